//! Query executor: runs validated queries with a time limit and shapes rows.
//!
//! The whole call, retries included, is bounded by the configured timeout.
//! Dropping the future on timeout cancels the in-flight store call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tcm_core::config::ExecutorSettings;
use tcm_core::{CellValue, ResultRow, ResultSet, Scalar, SchemaDescription};
use tcm_graph::{FailureKind, GraphStore, RawRow};

use crate::error::{AskError, Result};
use crate::guard::ValidatedQuery;

pub struct Executor {
    store: Arc<dyn GraphStore>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
    /// Key property per label, for collapsing nodes to one scalar.
    label_keys: HashMap<String, String>,
    /// Every distinct key property, tried in order for unlabelled maps.
    key_properties: Vec<String>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn GraphStore>,
        settings: &ExecutorSettings,
        schema: &SchemaDescription,
    ) -> Self {
        let mut label_keys = HashMap::new();
        let mut key_properties: Vec<String> = Vec::new();
        for label in schema.labels() {
            label_keys.insert(label.name.clone(), label.key.clone());
            if !key_properties.contains(&label.key) {
                key_properties.push(label.key.clone());
            }
        }
        Self {
            store,
            timeout: Duration::from_millis(settings.timeout_ms),
            max_retries: settings.max_retries,
            backoff: Duration::from_millis(settings.backoff_ms),
            label_keys,
            key_properties,
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub async fn execute(&self, query: &ValidatedQuery) -> Result<ResultSet> {
        let timeout_ms = self.timeout.as_millis() as u64;
        match tokio::time::timeout(self.timeout, self.run_with_retry(query)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms, "Query timed out");
                Err(AskError::Timeout { timeout_ms })
            }
        }
    }

    async fn run_with_retry(&self, query: &ValidatedQuery) -> Result<ResultSet> {
        let declared = query.columns();
        let take_all = declared.is_empty() || declared.iter().any(|c| c == "*");
        let columns: &[String] = if take_all { &[] } else { &declared };

        let mut attempt = 0u32;
        loop {
            match self.store.run_read(query.text(), query.params(), columns).await {
                Ok(rows) => {
                    tracing::debug!(rows = rows.len(), attempt, "Query executed");
                    return Ok(self.shape(columns, rows));
                }
                Err(e) => match e.kind() {
                    FailureKind::Unavailable if attempt < self.max_retries => {
                        let delay = self.backoff * 2u32.saturating_pow(attempt);
                        attempt += 1;
                        tracing::warn!(
                            attempt,
                            max_retries = self.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Store unavailable, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    FailureKind::Unavailable => {
                        return Err(AskError::StoreUnavailable(e.to_string()));
                    }
                    FailureKind::Malformed => {
                        tracing::error!(cypher = %query.text(), error = %e, "Store rejected query");
                        return Err(AskError::MalformedQuery(e.to_string()));
                    }
                    FailureKind::Other => {
                        return Err(AskError::StoreUnavailable(e.to_string()));
                    }
                },
            }
        }
    }

    fn shape(&self, columns: &[String], rows: Vec<RawRow>) -> ResultSet {
        let columns: Vec<String> = if columns.is_empty() {
            rows.first()
                .map(|row| row.iter().map(|(c, _)| c.clone()).collect())
                .unwrap_or_default()
        } else {
            columns.to_vec()
        };

        let rows = rows
            .into_iter()
            .map(|raw| {
                let mut row = ResultRow::new();
                for (column, value) in raw {
                    row.push(column, self.flatten(value));
                }
                row
            })
            .collect();
        ResultSet { columns, rows }
    }

    /// Scalars stay as they are, lists become lists of scalars, and nodes or
    /// maps collapse to their key property.
    fn flatten(&self, value: Value) -> CellValue {
        match value {
            Value::Array(items) => {
                CellValue::List(items.into_iter().map(|v| self.scalar(v)).collect())
            }
            other => CellValue::Scalar(self.scalar(other)),
        }
    }

    fn scalar(&self, value: Value) -> Scalar {
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Integer(i),
                None => Scalar::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Scalar::Text(s),
            Value::Array(items) => Scalar::Text(Value::Array(items).to_string()),
            Value::Object(mut map) => {
                let labels: Vec<String> = match map.get("labels") {
                    Some(Value::Array(labels)) => labels
                        .iter()
                        .filter_map(|l| l.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                if let Some(Value::Object(props)) = map.remove("properties") {
                    map = props;
                }
                let key = match self.key_for(&labels) {
                    Some(k) => map.get(k).cloned(),
                    None => self
                        .key_properties
                        .iter()
                        .find_map(|k| map.get(k).filter(|v| !v.is_null()).cloned()),
                };
                match key {
                    Some(Value::String(s)) => Scalar::Text(s),
                    Some(other) => self.scalar(other),
                    None => Scalar::Text(Value::Object(map).to_string()),
                }
            }
        }
    }

    /// Key property of the first catalog label a node carries.
    fn key_for(&self, labels: &[String]) -> Option<&str> {
        labels
            .iter()
            .find_map(|l| self.label_keys.get(l))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tcm_core::{QueryParams, SchemaCatalog};
    use tcm_graph::GraphError;

    use crate::guard::Guard;
    use crate::translate::CandidateQuery;

    /// Replays scripted responses; the last one repeats.
    struct ScriptedStore {
        responses: Mutex<VecDeque<std::result::Result<Vec<RawRow>, GraphError>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedStore {
        fn new(responses: Vec<std::result::Result<Vec<RawRow>, GraphError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from([Ok(Vec::new())])),
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    fn copy(r: &std::result::Result<Vec<RawRow>, GraphError>) -> std::result::Result<Vec<RawRow>, GraphError> {
        match r {
            Ok(rows) => Ok(rows.clone()),
            Err(GraphError::Connection(m)) => Err(GraphError::Connection(m.clone())),
            Err(GraphError::Rejected(m)) => Err(GraphError::Rejected(m.clone())),
            Err(e) => Err(GraphError::Serialization(e.to_string())),
        }
    }

    #[async_trait]
    impl GraphStore for ScriptedStore {
        async fn run_read(
            &self,
            _cypher: &str,
            _params: &QueryParams,
            _columns: &[String],
        ) -> std::result::Result<Vec<RawRow>, GraphError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                copy(responses.front().unwrap())
            }
        }

        async fn ping(&self) -> std::result::Result<(), GraphError> {
            Ok(())
        }
    }

    fn settings(timeout_ms: u64) -> ExecutorSettings {
        ExecutorSettings {
            timeout_ms,
            max_retries: 2,
            backoff_ms: 1,
        }
    }

    fn validated(text: &str) -> ValidatedQuery {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        Guard::new(schema, 200)
            .validate(CandidateQuery::new(text, QueryParams::new()))
            .unwrap()
    }

    fn executor(store: Arc<ScriptedStore>, timeout_ms: u64) -> Executor {
        let schema = SchemaCatalog::builtin().unwrap().describe();
        Executor::new(store, &settings(timeout_ms), &schema)
    }

    #[tokio::test]
    async fn test_rows_are_shaped() {
        let store = ScriptedStore::new(vec![Ok(vec![vec![
            ("中药".to_string(), json!("白芍")),
            ("频次".to_string(), json!(3)),
        ]])]);
        let result = executor(store, 1000)
            .execute(&validated(
                "MATCH (h:Herb) RETURN h.name AS 中药, count(*) AS 频次 LIMIT 10",
            ))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["中药".to_string(), "频次".to_string()]);
        assert_eq!(result.rows[0].get("中药"), Some(&CellValue::text("白芍")));
        assert_eq!(result.rows[0].get("频次"), Some(&CellValue::integer(3)));
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let store = ScriptedStore::new(vec![Ok(Vec::new())]);
        let result = executor(store, 1000)
            .execute(&validated("MATCH (h:Herb) RETURN h.name AS 中药 LIMIT 10"))
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["中药".to_string()]);
    }

    #[tokio::test]
    async fn test_unavailable_is_retried_then_surfaced() {
        let store = ScriptedStore::new(vec![Err(GraphError::Connection("refused".into()))]);
        let err = executor(store.clone(), 1000)
            .execute(&validated("MATCH (h:Herb) RETURN h.name AS 中药 LIMIT 10"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let store = ScriptedStore::new(vec![
            Err(GraphError::Connection("refused".into())),
            Ok(vec![vec![("中药".to_string(), json!("杏仁"))]]),
        ]);
        let result = executor(store.clone(), 1000)
            .execute(&validated("MATCH (h:Herb) RETURN h.name AS 中药 LIMIT 10"))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let store = ScriptedStore::new(vec![Err(GraphError::Rejected("Invalid input".into()))]);
        let err = executor(store.clone(), 1000)
            .execute(&validated("MATCH (h:Herb) RETURN h.name AS 中药 LIMIT 10"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MALFORMED_QUERY");
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let store = ScriptedStore::slow(Duration::from_secs(5));
        let err = executor(store, 30)
            .execute(&validated("MATCH (h:Herb) RETURN h.name AS 中药 LIMIT 10"))
            .await
            .unwrap_err();
        assert!(matches!(err, AskError::Timeout { timeout_ms: 30 }));
    }

    #[test]
    fn test_nodes_collapse_to_key() {
        let exec = executor(ScriptedStore::new(vec![Ok(Vec::new())]), 1000);
        let node = json!({"id": 4, "labels": ["Herb"], "properties": {"name": "白芍", "first_seen": "2024-01-01"}});
        assert_eq!(exec.flatten(node), CellValue::text("白芍"));
        assert_eq!(
            exec.flatten(json!(["舌红", "苔薄"])),
            CellValue::List(vec![Scalar::Text("舌红".into()), Scalar::Text("苔薄".into())])
        );
        let prescription = json!({
            "id": 9,
            "labels": ["Prescription"],
            "properties": {"case_id": "C001", "idx": 0, "formula": "小青龙汤", "method": "水煎服"}
        });
        assert_eq!(exec.flatten(prescription), CellValue::text("小青龙汤"));
        let case = json!({"labels": ["Case"], "properties": {"case_id": "C001", "symptoms": ["咳嗽"]}});
        assert_eq!(exec.flatten(case), CellValue::text("C001"));
        assert_eq!(
            exec.flatten(json!({"dose": "10g"})),
            CellValue::text(r#"{"dose":"10g"}"#)
        );
    }
}
