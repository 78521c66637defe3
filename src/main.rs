//! `ragline` command line: build an index, then ask it questions.
//!
//! ```bash
//! # Index the built-in sample snippets
//! ragline index
//!
//! # Index files, wiping the collection first
//! ragline index --reset notes/*.md
//!
//! # Ask a question
//! ragline query "What is RAG?" --k 2
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ragline_core::bootstrap::{App, health_check, load_config, resolve_config_path, sample_corpus};
use ragline_core::config::Config;
use ragline_core::vault::EnvVaultProvider;
use ragline_index::{AnswerResponse, Document, IndexReport, loader_for};

const DEFAULT_QUESTION: &str = "Explain RAG to a junior backend developer.";
const SNIPPET_CHARS: usize = 120;

#[derive(Parser, Debug)]
#[command(name = "ragline", version, about)]
struct Cli {
    /// Path to the TOML config file (default: `RAGLINE_CONFIG` or config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed and store documents; indexes the sample snippets when no files are given
    Index {
        /// Text, Markdown or (with the `pdf` feature) PDF files to index
        files: Vec<PathBuf>,

        /// Delete the collection before indexing
        #[arg(long)]
        reset: bool,
    },
    /// Answer a question from the indexed collection
    Query {
        /// Question to answer
        #[arg(default_value = DEFAULT_QUESTION)]
        question: String,

        /// Number of snippets to retrieve (overrides `query.top_k`)
        #[arg(short, long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(&config_path, &EnvVaultProvider, |config| {
        apply_flags(config, &cli.command);
    })
    .await?;
    let app = App::build(config).await?;
    health_check(app.chat_provider()).await;

    let token = app.cancellation_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal, cancelling in-flight calls");
        token.cancel();
    });

    match cli.command {
        Command::Index { files, reset } => {
            let report = run_index(&app, &files, reset).await?;
            println!("{}", format_report(&report, &app.collection().name));
        }
        Command::Query { question, .. } => {
            let response = app.query_pipeline()?.run(&question).await?;
            print!("{}", format_answer(&question, &response));
        }
    }
    Ok(())
}

fn apply_flags(config: &mut Config, command: &Command) {
    if let Command::Query { k: Some(k), .. } = command {
        config.query.top_k = *k;
    }
}

async fn load_documents(files: &[PathBuf]) -> anyhow::Result<Vec<Document>> {
    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let loader = loader_for(path)
            .with_context(|| format!("no loader for {}", path.display()))?;
        let doc = loader
            .load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
        documents.push(doc);
    }
    Ok(documents)
}

async fn run_index(app: &App, files: &[PathBuf], reset: bool) -> anyhow::Result<IndexReport> {
    let pipeline = app.indexing_pipeline()?;
    if reset {
        pipeline.reset().await?;
        tracing::info!(collection = %app.collection().name, "collection reset");
    }

    let documents = if files.is_empty() {
        tracing::info!("no files given, indexing sample snippets");
        sample_corpus()
    } else {
        load_documents(files).await?
    };

    Ok(pipeline.run(&documents).await?)
}

fn format_report(report: &IndexReport, collection: &str) -> String {
    format!(
        "Indexed {} documents ({} chunks) into '{collection}'; it now holds {} records.",
        report.documents, report.chunks, report.total_records
    )
}

fn format_answer(question: &str, response: &AnswerResponse) -> String {
    let mut out = format!("\nQ: {question}\n\nA: {}\n\nSources:\n", response.answer);
    for (i, record) in response.context.iter().enumerate() {
        let snippet: String = record.text.chars().take(SNIPPET_CHARS).collect();
        let _ = writeln!(out, "- [{}] {snippet}...", i + 1);
    }
    out
}

/// Logs go to stderr so stdout carries only command output.
fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
