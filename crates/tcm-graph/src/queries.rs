//! Fixed read operations used by ingestion and health reporting.
//!
//! Free-form questions go through [`crate::GraphStore::run_read`]; these are
//! the handful of queries the tools themselves need.

use std::collections::BTreeMap;

use neo4rs::query;

use crate::client::{GraphClient, GraphError};

/// Node counts per label, keyed by label name.
pub type GraphSummary = BTreeMap<String, i64>;

impl GraphClient {
    /// Whether a case with this id is present.
    pub async fn case_exists(&self, case_id: &str) -> Result<bool, GraphError> {
        let q = query("MATCH (c:Case {case_id: $case_id}) RETURN count(c) AS cnt")
            .param("case_id", case_id.to_string());
        match self.fetch_first(q).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0) > 0),
            None => Ok(false),
        }
    }

    /// Count nodes carrying `label`.
    ///
    /// The label is interpolated into the statement, so callers must pass a
    /// name taken from the schema catalog.
    pub async fn count_nodes(&self, label: &str) -> Result<i64, GraphError> {
        if !is_identifier(label) {
            return Err(GraphError::Rejected(format!("invalid label: {label}")));
        }
        let cypher = format!("MATCH (n:{label}) RETURN count(n) AS cnt");
        match self.fetch_first(query(&cypher)).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Node counts for each of the given labels.
    pub async fn summary<'a, I>(&self, labels: I) -> Result<GraphSummary, GraphError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut summary = GraphSummary::new();
        for label in labels {
            summary.insert(label.to_string(), self.count_nodes(label).await?);
        }
        Ok(summary)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
