//! Read-only store interface used by the question engine.

use async_trait::async_trait;
use neo4rs::{query, Query};
use tcm_core::{ParamValue, QueryParams};

use crate::client::{GraphClient, GraphError};

/// Column values of one row as returned by the store, before shaping.
pub type RawRow = Vec<(String, serde_json::Value)>;

/// Read access to the case graph.
///
/// Consumers hold `Arc<dyn GraphStore>`; the Neo4j client implements it and
/// tests substitute an in-memory fake.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run a read query. `columns` names the projected columns in order;
    /// when empty, every returned column is taken.
    async fn run_read(
        &self,
        cypher: &str,
        params: &QueryParams,
        columns: &[String],
    ) -> Result<Vec<RawRow>, GraphError>;

    /// Cheap reachability check (`RETURN 1`).
    async fn ping(&self) -> Result<(), GraphError>;
}

/// Attach query parameters. Values are never spliced into the text.
pub fn bind_params(cypher: &str, params: &QueryParams) -> Query {
    params
        .iter()
        .fold(query(cypher), |q, (name, value)| match value {
            ParamValue::Text(s) => q.param(name, s.clone()),
            ParamValue::Integer(i) => q.param(name, *i),
            ParamValue::List(items) => q.param(name, items.clone()),
        })
}

#[async_trait]
impl GraphStore for GraphClient {
    async fn run_read(
        &self,
        cypher: &str,
        params: &QueryParams,
        columns: &[String],
    ) -> Result<Vec<RawRow>, GraphError> {
        let rows = self.fetch_all(bind_params(cypher, params)).await?;
        let mut results = Vec::with_capacity(rows.len());

        for row in rows {
            let raw = if columns.is_empty() {
                let value: serde_json::Value = row.to().map_err(|e| {
                    GraphError::Serialization(format!("Failed to deserialize row: {e}"))
                })?;
                match value {
                    serde_json::Value::Object(map) => map.into_iter().collect(),
                    other => vec![("value".to_string(), other)],
                }
            } else {
                let mut cells = Vec::with_capacity(columns.len());
                for column in columns {
                    let value: serde_json::Value = row.get(column).map_err(|e| {
                        GraphError::Serialization(format!(
                            "Failed to deserialize column {column}: {e}"
                        ))
                    })?;
                    cells.push((column.clone(), value));
                }
                cells
            };
            results.push(raw);
        }

        Ok(results)
    }

    async fn ping(&self) -> Result<(), GraphError> {
        match self.fetch_first(query("RETURN 1 AS ok")).await? {
            Some(_) => Ok(()),
            None => Err(GraphError::Connection(
                "Ping returned no rows".to_string(),
            )),
        }
    }
}
