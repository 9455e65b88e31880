//! Error types for the tcm-ingest crate.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Source directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("Case file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid case record in {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("Graph error: {0}")]
    Graph(#[from] tcm_graph::GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
