//! tcm-graph: Neo4j client for the case knowledge graph.
//!
//! Reads flow through the [`GraphStore`] trait so the question engine never
//! holds a write-capable handle. Writes (case-record upserts) are only used
//! by the ingestion pipeline.

pub mod client;
pub mod mutations;
pub mod queries;
pub mod store;

pub use client::{FailureKind, GraphClient, GraphConfig, GraphError};
pub use queries::GraphSummary;
pub use store::{GraphStore, RawRow};
