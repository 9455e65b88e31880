//! Configuration management for TCM services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`TCM__SECTION__KEY`)
//! 2. Config file (`tcm.toml`, prefix overridable)
//! 3. Defaults

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top-level configuration shared by the `tcm-ask` and `tcm-ingest` binaries.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub neo4j: Neo4jSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub guard: GuardSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
}

/// Neo4j connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Neo4jSettings {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

/// Where the schema catalog is read from. `None` uses the built-in definition.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogSettings {
    #[serde(default)]
    pub path: Option<String>,
}

/// Session store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    /// Maximum turns kept per session.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Sessions idle longer than this are evicted by the sweeper.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// JSON file for durable sessions. In-memory only when unset.
    #[serde(default)]
    pub persist_path: Option<String>,

    /// Serialize whole requests per session so history follows arrival order.
    #[serde(default)]
    pub serialize_requests: bool,
}

/// Query guard policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardSettings {
    /// Largest `LIMIT` a query may carry.
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
}

/// Query execution policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after a store-unavailable failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubled on each further attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

/// Prompt-based translation against an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

/// JSON case-record source for ingestion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestSettings {
    #[serde(default = "default_json_dir")]
    pub json_dir: String,
    /// Only files whose name starts with this prefix are imported.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "test12345".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_history_cap() -> usize {
    5
}

fn default_idle_ttl() -> u64 {
    1800
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_rows() -> u64 {
    200
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    30
}

fn default_json_dir() -> String {
    "json_data".to_string()
}

fn default_file_prefix() -> String {
    "f".to_string()
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_cap: default_history_cap(),
            idle_ttl_secs: default_idle_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            persist_path: None,
            serialize_requests: false,
        }
    }
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            json_dir: default_json_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `{file_prefix}.toml` (optional) and `TCM__` variables.
    pub fn load(file_prefix: &str) -> Result<Self, CoreError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TCM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app: AppConfig = cfg.try_deserialize()?;
        if app.llm.api_key.is_none() {
            app.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        app.validate()?;
        Ok(app)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.session.history_cap == 0 {
            return Err(CoreError::Config(
                "session.history_cap must be at least 1".to_string(),
            ));
        }
        if self.guard.max_rows == 0 {
            return Err(CoreError::Config(
                "guard.max_rows must be at least 1".to_string(),
            ));
        }
        if self.executor.timeout_ms == 0 {
            return Err(CoreError::Config(
                "executor.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
        assert_eq!(config.session.history_cap, 5);
        assert_eq!(config.guard.max_rows, 200);
        assert_eq!(config.executor.max_retries, 2);
        assert!(!config.llm.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tcm.toml");
        std::fs::write(
            &path,
            r#"
[session]
history_cap = 3
serialize_requests = true

[guard]
max_rows = 50
"#,
        )
        .unwrap();

        let prefix = dir.path().join("tcm");
        let config = AppConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.session.history_cap, 3);
        assert!(config.session.serialize_requests);
        assert_eq!(config.guard.max_rows, 50);
        // Untouched sections keep their defaults.
        assert_eq!(config.executor.timeout_ms, 15_000);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let mut config = AppConfig::default();
        config.session.history_cap = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
