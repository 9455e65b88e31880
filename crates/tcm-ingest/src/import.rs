//! Bulk import and single-case refresh.
//!
//! Import: constraints first, then every case file in name order, then a
//! node count per catalog label. Refresh: one file, its case removed and
//! written again.

use async_trait::async_trait;

use tcm_core::{CaseRecord, SchemaDescription};
use tcm_graph::{GraphClient, GraphError, GraphSummary};

use crate::error::Result;
use crate::loader::{load_file, CaseSource};

/// The graph writes ingestion needs.
#[async_trait]
pub trait CaseWriter: Send + Sync {
    async fn ensure_constraints(&self) -> std::result::Result<(), GraphError>;
    async fn upsert_case(&self, record: &CaseRecord) -> std::result::Result<(), GraphError>;
    async fn replace_case(&self, record: &CaseRecord) -> std::result::Result<(), GraphError>;
    async fn summary(&self, labels: &[&str]) -> std::result::Result<GraphSummary, GraphError>;
}

#[async_trait]
impl CaseWriter for GraphClient {
    async fn ensure_constraints(&self) -> std::result::Result<(), GraphError> {
        GraphClient::ensure_constraints(self).await
    }

    async fn upsert_case(&self, record: &CaseRecord) -> std::result::Result<(), GraphError> {
        GraphClient::upsert_case(self, record).await
    }

    async fn replace_case(&self, record: &CaseRecord) -> std::result::Result<(), GraphError> {
        GraphClient::replace_case(self, record).await
    }

    async fn summary(&self, labels: &[&str]) -> std::result::Result<GraphSummary, GraphError> {
        GraphClient::summary(self, labels.to_vec()).await
    }
}

/// Outcome of a full import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub cases: usize,
    pub summary: GraphSummary,
}

/// Import every case file from `source`.
///
/// All files are parsed and validated before the first write.
pub async fn import_all<W: CaseWriter + ?Sized>(
    writer: &W,
    source: &CaseSource,
    schema: &SchemaDescription,
) -> Result<ImportReport> {
    let cases = source.load_all()?;
    tracing::info!(dir = %source.dir().display(), files = cases.len(), "Case files loaded");

    writer.ensure_constraints().await?;

    for case in &cases {
        writer.upsert_case(&case.record).await?;
        tracing::debug!(
            case_id = %case.record.case_id,
            file = %case.path.display(),
            prescriptions = case.record.prescriptions.len(),
            "Case imported"
        );
    }

    let labels: Vec<&str> = schema.labels().iter().map(|l| l.name.as_str()).collect();
    let summary = writer.summary(&labels).await?;
    for (label, count) in &summary {
        tracing::info!(label = %label, count, "Node count");
    }

    Ok(ImportReport {
        cases: cases.len(),
        summary,
    })
}

/// Re-read one case file and replace its case in the graph.
pub async fn refresh_file<W: CaseWriter + ?Sized>(
    writer: &W,
    source: &CaseSource,
    file_name: &str,
) -> Result<CaseRecord> {
    let path = source.resolve(file_name)?;
    let case = load_file(&path)?;
    writer.replace_case(&case.record).await?;
    tracing::info!(
        case_id = %case.record.case_id,
        file = %path.display(),
        "Case refreshed"
    );
    Ok(case.record)
}
