//! Connection pool, driver error classification and low-level statement
//! helpers for the case graph.

use neo4rs::{ConfigBuilder, Graph, Query, Row, Txn};
use tcm_core::config::Neo4jSettings;

/// Failures of graph reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Statement rejected by the store: {0}")]
    Rejected(String),

    #[error("Case not found: {case_id}")]
    CaseNotFound { case_id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// How a failed store call should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection-level failure; a later attempt may succeed.
    Unavailable,
    /// The store refused the statement (syntax or semantic error).
    Malformed,
    Other,
}

impl GraphError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection(_) => FailureKind::Unavailable,
            Self::Rejected(_) => FailureKind::Malformed,
            Self::Query(e) => classify_driver_error(e),
            Self::CaseNotFound { .. } | Self::Serialization(_) => FailureKind::Other,
        }
    }
}

/// Sort a driver error into a failure kind by its reported cause.
fn classify_driver_error(err: &neo4rs::Error) -> FailureKind {
    let detail = format!("{err:?} {err}");
    if detail.contains("Neo.ClientError.Statement") || detail.contains("SyntaxError") {
        FailureKind::Malformed
    } else if detail.contains("IOError")
        || detail.contains("ConnectionError")
        || detail.contains("Connection refused")
        || detail.contains("broken pipe")
        || detail.contains("Neo.TransientError")
        || detail.contains("ServiceUnavailable")
        || detail.contains("pool")
    {
        FailureKind::Unavailable
    } else {
        FailureKind::Other
    }
}

/// Driver settings, derived from the `neo4j` config section.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::from(&Neo4jSettings::default())
    }
}

impl From<&Neo4jSettings> for GraphConfig {
    fn from(settings: &Neo4jSettings) -> Self {
        Self {
            uri: settings.uri.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            max_connections: settings.max_connections,
            fetch_size: settings.fetch_size,
        }
    }
}

/// Pooled handle to the case graph. Cloning shares the pool.
///
/// The question engine only sees it as a [`crate::GraphStore`]; the write
/// helpers below are crate-private and surface through the mutation API.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Open the pool and verify the server answers.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let driver_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(driver_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;
        let client = Self { graph };

        client
            .fetch_first(neo4rs::query("RETURN 1 AS ok"))
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(
            uri = %config.uri,
            max_connections = config.max_connections,
            "Graph connection established"
        );
        Ok(client)
    }

    /// Run a statement, discarding any rows.
    pub(crate) async fn execute(&self, statement: Query) -> Result<(), GraphError> {
        self.graph.run(statement).await.map_err(GraphError::from)
    }

    /// Stream every row of a query into memory.
    pub(crate) async fn fetch_all(&self, statement: Query) -> Result<Vec<Row>, GraphError> {
        let mut stream = self.graph.execute(statement).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub(crate) async fn fetch_first(&self, statement: Query) -> Result<Option<Row>, GraphError> {
        let mut stream = self.graph.execute(statement).await?;
        stream.next().await.map_err(GraphError::from)
    }

    pub(crate) async fn begin(&self) -> Result<Txn, GraphError> {
        self.graph.start_txn().await.map_err(GraphError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            GraphError::Connection("refused".into()).kind(),
            FailureKind::Unavailable
        );
        assert_eq!(
            GraphError::Rejected("Invalid input 'RETRUN'".into()).kind(),
            FailureKind::Malformed
        );
        assert_eq!(
            GraphError::Serialization("bad row".into()).kind(),
            FailureKind::Other
        );
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Neo4jSettings {
            uri: "bolt://graph:7687".into(),
            ..Default::default()
        };
        let config = GraphConfig::from(&settings);
        assert_eq!(config.uri, "bolt://graph:7687");
        assert_eq!(config.user, "neo4j");
        assert_eq!(config.max_connections, 16);
    }
}
