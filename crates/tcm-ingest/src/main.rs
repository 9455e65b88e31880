//! CLI entry point for case-record ingestion.

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use tcm_core::{AppConfig, SchemaCatalog};
use tcm_graph::{GraphClient, GraphConfig};

use tcm_ingest::{import_all, refresh_file, CaseSource};

#[derive(Parser)]
#[command(name = "tcm-ingest")]
#[command(about = "Load JSON case records into the TCM case knowledge graph")]
struct Cli {
    /// Config file prefix (default: tcm).
    #[arg(short, long, default_value = "tcm")]
    config: String,

    /// Override the case-record directory.
    #[arg(long)]
    json_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import every case file in the directory.
    Import,

    /// Replace one case from its (edited) file.
    Refresh {
        /// File name inside the case-record directory, e.g. f001.json.
        #[arg(short, long)]
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let json_dir = cli.json_dir.unwrap_or_else(|| config.ingest.json_dir.clone());
    let source = CaseSource::new(json_dir, config.ingest.file_prefix.clone());

    let graph = GraphClient::connect(&GraphConfig::from(&config.neo4j)).await?;

    match cli.command {
        Command::Import => {
            let catalog = SchemaCatalog::load(config.catalog.path.as_deref().map(Path::new))?;
            let report = import_all(&graph, &source, &catalog.describe()).await?;
            tracing::info!(cases = report.cases, "Import complete");
        }
        Command::Refresh { file } => {
            let record = refresh_file(&graph, &source, &file).await?;
            tracing::info!(case_id = %record.case_id, "Refresh complete");
        }
    }

    Ok(())
}
