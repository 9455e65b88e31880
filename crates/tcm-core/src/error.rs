use thiserror::Error;

/// Top-level error type for shared TCM components.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Schema catalog failures. Always fatal at startup.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read schema definition {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed schema definition: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid schema definition: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for CoreError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
