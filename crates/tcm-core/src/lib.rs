//! tcm-core: Schema catalog, shared types, configuration, and error handling
//! for the TCM case knowledge graph.
//!
//! This crate provides the foundational pieces used across all components:
//! - The schema catalog (labels, relationship types, properties)
//! - Session, query parameter, and result row types
//! - JSON case records ingested into the graph
//! - Configuration management
//! - Common error types

pub mod catalog;
pub mod config;
pub mod error;
pub mod records;
pub mod types;

pub use catalog::{SchemaCatalog, SchemaDescription};
pub use config::AppConfig;
pub use error::{CatalogError, CoreError};
pub use records::{CaseRecord, HerbRecord, PrescriptionRecord};
pub use types::{
    Binding, BindingOrigin, CellValue, ParamValue, QueryParams, ResultRow, ResultSet, Scalar,
    SessionRecord, Turn,
};
