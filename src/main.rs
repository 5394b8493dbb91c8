use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use trove_core::bootstrap::{
    build_filter, build_indexer, build_retriever, create_provider, discover_documents,
    load_config, open_store, resolve_config_path,
};
use trove_core::Config;
use trove_index::{FileStatus, PassReport, format_results};
use trove_llm::EmbeddingProvider;

/// Incremental semantic index over a tree of documents and source code.
#[derive(Parser)]
#[command(name = "trove", version, about)]
struct Cli {
    /// Config file (default: `TROVE_CONFIG` or ./trove.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the index in line with the directory tree
    Index {
        /// Directory to index (overrides `index.root`)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Query the index and print formatted context
    Search {
        query: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Metadata filter as key=value; repeated `file_path` pairs mean "any of"
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Output template (overrides `retrieval.template`)
        #[arg(long)]
        template: Option<String>,
    },
    /// Show index statistics and check store consistency
    Status {
        /// Remove rows no record references
        #[arg(long)]
        repair: bool,
    },
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(&config_path)?;

    match cli.command {
        Command::Index { root } => {
            let root = root.unwrap_or_else(|| PathBuf::from(&config.index.root));
            run_index(&config, &root).await
        }
        Command::Search {
            query,
            top_k,
            filters,
            template,
        } => {
            run_search(&config, &query, top_k, &filters, template.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { repair } => run_status(&config, repair).await,
    }
}

async fn run_index(config: &Config, root: &Path) -> anyhow::Result<ExitCode> {
    let provider = Arc::new(create_provider(config)?);
    let store = open_store(config, provider.model()).await?;
    let indexer = build_indexer(config, Arc::clone(&store), provider)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal, finishing in-flight work");
        on_signal.cancel();
    });

    let docs = discover_documents(root, config).await?;
    tracing::info!(root = %root.display(), files = docs.len(), "discovered documents");

    let report = indexer.run_pass(docs, cancel).await;
    store.close().await;
    let report = report?;

    print_report(&report);
    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &PassReport) {
    let indexed = report.count(|s| matches!(s, FileStatus::Indexed { .. }));
    let unchanged = report.count(|s| matches!(s, FileStatus::Unchanged));
    let deleted = report.count(|s| matches!(s, FileStatus::Deleted));
    let cancelled = report.count(|s| matches!(s, FileStatus::Cancelled));

    println!(
        "indexed {indexed}, unchanged {unchanged}, deleted {deleted}, \
         {} chunks in {} embed calls ({} ms)",
        report.chunks_embedded, report.embed_calls, report.duration_ms
    );
    for outcome in report.failed() {
        if let FileStatus::Failed { reason } = &outcome.status {
            println!("failed {}: {reason}", outcome.path);
        }
    }
    if cancelled > 0 {
        println!("cancelled before {cancelled} files were committed");
    }
}

async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    filters: &[String],
    template: Option<&str>,
) -> anyhow::Result<()> {
    let filter = build_filter(config, filters)?;
    let provider = Arc::new(create_provider(config)?);
    let store = open_store(config, provider.model()).await?;
    let retriever = build_retriever(config, Arc::clone(&store), provider)?;

    let top_k = top_k.unwrap_or(retriever.config().top_k);
    let template = template.unwrap_or(&retriever.config().template).to_owned();
    let results = retriever.search(query, top_k, &filter).await;
    store.close().await;
    let results = results?;

    if results.is_empty() {
        eprintln!("no results");
        return Ok(());
    }
    println!("{}", format_results(&results, &template)?);
    Ok(())
}

async fn run_status(config: &Config, repair: bool) -> anyhow::Result<ExitCode> {
    let store = open_store(config, &config.embedding.model).await?;
    let stats = store.stats().await?;
    let dimension = stats
        .dimension
        .map_or_else(|| "unset".to_owned(), |d| d.to_string());
    println!(
        "model {}, dimension {dimension}, {} files, {} chunks",
        stats.model, stats.files, stats.chunks
    );

    let report = store.verify_consistency().await?;
    let code = if report.is_consistent() {
        println!("store is consistent");
        ExitCode::SUCCESS
    } else {
        println!(
            "{} chunks missing, {} orphaned rows",
            report.missing.len(),
            report.orphaned.len()
        );
        if repair {
            let recovery = store.recover().await?;
            println!("removed {} orphaned rows", recovery.orphaned_rows);
            for path in &recovery.dropped_files {
                println!("dropped {path}; the next `trove index` indexes it again");
            }
        }
        if repair && store.verify_consistency().await?.is_consistent() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    };
    store.close().await;
    Ok(code)
}
