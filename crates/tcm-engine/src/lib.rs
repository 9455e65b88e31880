//! tcm-engine: Question-to-Cypher engine for the TCM case graph.
//!
//! Translates free-text clinical questions (with per-session context) into
//! read-only Cypher, validates it against the schema catalog, executes it
//! with bounded time and shapes the rows for display.

pub mod compose;
pub mod engine;
pub mod error;
pub mod executor;
pub mod guard;
pub mod session;
pub mod translate;

pub use compose::{Answer, AnswerFormat};
pub use engine::{AskRequest, AskResponse, Engine, HealthReport};
pub use error::{AskError, Result};
pub use session::{JsonFileBackend, MemoryBackend, SessionBackend, SessionStore};
