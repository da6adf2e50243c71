mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bear_retrieval::search::EmbeddingProvider;
use bear_retrieval::{Config, NoteStore, Retriever};

#[derive(Parser)]
#[command(name = "bear-search")]
#[command(about = "Keyword and AI-powered semantic search over Bear notes", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, short = 'c', global = true, value_name = "FILE", help = "Config file (TOML)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild and persist the semantic search index
    Index {
        #[arg(long, help = "Show index status only")]
        status: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Search notes (semantic when an index is available)
    Search {
        query: String,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "Use keyword search only (no AI)")]
        keyword: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List all tags in use
    Tags {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Start MCP server on stdio
    #[cfg(feature = "mcp")]
    Mcp {
        #[arg(long, help = "Show MCP client configuration instructions")]
        install: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.log_level);

    match &cli.command {
        #[cfg(feature = "mcp")]
        Commands::Mcp { install: true } => {
            commands::mcp::print_install_instructions(cli.config.as_deref());
            return Ok(());
        }
        // One-shot commands never build an index implicitly.
        Commands::Index { .. } | Commands::Search { .. } | Commands::Tags { .. } => {
            config.index.build_on_startup = false;
        }
        #[cfg(feature = "mcp")]
        Commands::Mcp { .. } => {}
    }

    let store = NoteStore::open(&config.store).with_context(|| {
        format!(
            "Failed to open Bear database at {}",
            config.store.database_path.display()
        )
    })?;
    let provider = EmbeddingProvider::from_config(&config.embedding);
    let retriever = Arc::new(Retriever::new(store, provider, &config.index));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        retriever.bootstrap().await;

        match cli.command {
            Commands::Index { status, json } => commands::index::run(&retriever, status, json).await,
            Commands::Search {
                query,
                limit,
                keyword,
                json,
            } => commands::search::run(&retriever, &query, limit, keyword, json).await,
            Commands::Tags { json } => commands::tags::run(&retriever, json).await,
            #[cfg(feature = "mcp")]
            Commands::Mcp { .. } => bear_retrieval::mcp::run_mcp_server(retriever).await,
        }
    })
}

/// Logs go to stderr; stdout carries the MCP transport.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
