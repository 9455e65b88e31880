//! CLI entry point for asking questions of the TCM case graph.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use tcm_core::{AppConfig, SchemaCatalog};
use tcm_graph::{GraphClient, GraphConfig, GraphStore};

use tcm_engine::compose::render_markdown;
use tcm_engine::{AskRequest, AskResponse, Engine};

#[derive(Parser)]
#[command(name = "tcm-ask")]
#[command(about = "Ask questions of the TCM case knowledge graph")]
struct Cli {
    /// Config file prefix (default: tcm).
    #[arg(short, long, default_value = "tcm")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question.
    Ask {
        question: String,

        #[arg(short, long, default_value = "default")]
        session: String,

        /// Translate and validate only.
        #[arg(long)]
        dry_run: bool,

        /// Print the raw response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive session. `:reset` clears the history, `:quit` exits.
    Repl {
        #[arg(short, long, default_value = "default")]
        session: String,
    },

    /// Print the schema catalog, example queries and suggested questions.
    Schema,

    /// Report component status.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    if let Command::Schema = cli.command {
        return print_schema(&config);
    }

    let graph = GraphClient::connect(&GraphConfig::from(&config.neo4j)).await?;
    let store: Arc<dyn GraphStore> = Arc::new(graph);
    let engine = Engine::from_config(&config, store)?;

    match cli.command {
        Command::Ask {
            question,
            session,
            dry_run,
            json,
        } => {
            let mut request = AskRequest::new(question).session(session);
            if dry_run {
                request = request.dry_run();
            }
            let response = engine.ask(request).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
            if !response.ok {
                std::process::exit(1);
            }
        }
        Command::Repl { session } => repl(&engine, &session).await?,
        Command::Health => {
            let report = engine.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.ok {
                std::process::exit(1);
            }
        }
        Command::Schema => {}
    }

    Ok(())
}

async fn repl(engine: &Engine, session: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("会话 {session}。输入问题，:reset 清空上下文，:quit 退出。");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            ":quit" | ":q" | ":exit" => break,
            ":reset" => {
                engine.reset_session(session)?;
                println!("上下文已清空。");
            }
            question => {
                let response = engine.ask(AskRequest::new(question).session(session)).await;
                print_response(&response);
            }
        }
    }
    Ok(())
}

fn print_response(response: &AskResponse) {
    if let Some(error) = &response.error {
        println!("[{}] {}", error.code, error.message);
        return;
    }

    if let Some(query) = &response.query {
        println!("Cypher: {query}");
    }
    if !response.params.is_empty() {
        if let Ok(params) = serde_json::to_string(&response.params) {
            println!("参数: {params}");
        }
    }
    if response.used_prior_context {
        println!("（已使用上一轮上下文）");
    }
    if let Some(answer) = &response.answer {
        println!("{answer}");
    } else if let Some(result) = response.result_set().filter(|_| !response.dry_run) {
        print!("{}", render_markdown(&result));
    }
}

fn print_schema(config: &AppConfig) -> anyhow::Result<()> {
    let catalog = SchemaCatalog::load(config.catalog.path.as_deref().map(std::path::Path::new))?;
    let schema = catalog.describe();

    println!("节点：");
    for label in schema.labels() {
        let props: Vec<String> = label
            .properties
            .iter()
            .map(|p| if p.list { format!("{}[]", p.name) } else { p.name.clone() })
            .collect();
        println!("  (:{}) key={} props={}", label.name, label.key, props.join(", "));
    }
    println!("关系：");
    for rel in schema.relationships() {
        println!("  (:{})-[:{}]->(:{})", rel.source, rel.name, rel.target);
    }
    println!("示例查询：");
    for example in schema.examples() {
        println!("  {example}");
    }
    println!("推荐问题：");
    for question in schema.recommended_questions() {
        println!("  {question}");
    }
    Ok(())
}
