//! tcm-ingest: Loads JSON case records into the TCM case graph.
//!
//! The JSON directory is the source of truth. `import` rebuilds the graph
//! from every case file; `refresh` replaces a single edited case.

pub mod error;
pub mod import;
pub mod loader;

pub use error::{IngestError, Result};
pub use import::{import_all, refresh_file, CaseWriter, ImportReport};
pub use loader::{CaseSource, LoadedCase};
