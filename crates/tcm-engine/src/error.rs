//! Error types for the tcm-engine crate.

use thiserror::Error;

/// Why a question produced no answer. Each variant maps to a stable code.
#[derive(Error, Debug)]
pub enum AskError {
    #[error("Question could not be translated: {0}")]
    Untranslatable(String),

    #[error("Query would modify the graph: {0}")]
    MutationForbidden(String),

    #[error("Query references unknown schema elements: {0}")]
    UnknownSchemaReference(String),

    #[error("Query result is not bounded: {0}")]
    UnboundedResult(String),

    #[error("Query exceeded the {timeout_ms}ms time limit")]
    Timeout { timeout_ms: u64 },

    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Graph store rejected the query: {0}")]
    MalformedQuery(String),

    #[error("Session store error: {0}")]
    SessionStore(#[from] crate::session::SessionError),

    #[error("Config error: {0}")]
    Config(String),
}

impl AskError {
    /// Stable signal string reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Untranslatable(_) => "UNTRANSLATABLE",
            Self::MutationForbidden(_) => "MUTATION_FORBIDDEN",
            Self::UnknownSchemaReference(_) => "UNKNOWN_SCHEMA_REFERENCE",
            Self::UnboundedResult(_) => "UNBOUNDED_RESULT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::MalformedQuery(_) => "MALFORMED_QUERY",
            Self::SessionStore(_) => "SESSION_STORE",
            Self::Config(_) => "CONFIG",
        }
    }
}

pub type Result<T> = std::result::Result<T, AskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AskError::Untranslatable("x".into()).code(), "UNTRANSLATABLE");
        assert_eq!(AskError::Timeout { timeout_ms: 10 }.code(), "TIMEOUT");
        assert_eq!(
            AskError::StoreUnavailable("down".into()).code(),
            "STORE_UNAVAILABLE"
        );
        assert_eq!(AskError::MalformedQuery("bad".into()).code(), "MALFORMED_QUERY");
    }
}
