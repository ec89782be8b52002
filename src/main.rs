//! # Tenant RAG CLI (`trag`)
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/trag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag ingest <tenant> [--dir DIR]` | Load the dataset directory, or append DIR |
//! | `trag search <tenant> "<query>"` | Top-k chunks for a query |
//! | `trag ask <tenant> "<question>"` | One answer, no history |
//! | `trag chat <tenant>` | Interactive conversation on stdin |
//! | `trag faq <tenant> <question> <answer>` | Add an FAQ entry |
//! | `trag manual <tenant> [TEXT] [--file F]` | Add free text |
//! | `trag import-crawl <tenant> <file>` | Import crawler output |
//! | `trag upload <tenant> <file>` | Stage a file for the tenant |
//! | `trag finalize <tenant>` | Move staged files into the dataset and ingest |
//! | `trag relabel <tenant>` | Retry labeling of `Unlabeled` chunks |
//! | `trag embed <tenant>` | Backfill missing embeddings |
//! | `trag stats <tenant>` | Index counts |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `tenant_rag=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tenant_rag::{commands, config};

/// Multi-tenant document ingestion and retrieval-augmented answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "trag",
    about = "Multi-tenant document ingestion and retrieval-augmented answering",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/trag.toml`. If that file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/trag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into a tenant's index.
    ///
    /// Without `--dir`, ingests the tenant's dataset directory. With it,
    /// appends the supported files of DIR. Files already indexed are skipped.
    Ingest {
        tenant: String,
        /// Directory to append instead of the dataset directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Search a tenant's index.
    Search { tenant: String, query: String },

    /// Answer one question from a tenant's documents.
    Ask { tenant: String, query: String },

    /// Interactive conversation; history is kept for the session.
    Chat { tenant: String },

    /// Add or replace an FAQ entry and ingest it.
    Faq {
        tenant: String,
        question: String,
        answer: String,
    },

    /// Add free text to the dataset and ingest it.
    Manual {
        tenant: String,
        text: Option<String>,
        /// Read the text from a file.
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },

    /// Convert crawler output (JSON Lines or array of {url, content}) into a
    /// dataset file and ingest it.
    ImportCrawl { tenant: String, file: PathBuf },

    /// Stage a file for the tenant. Run `finalize` to ingest staged files.
    Upload { tenant: String, file: PathBuf },

    /// Move staged uploads into the dataset directory and ingest them.
    Finalize { tenant: String },

    /// Retry labeling for chunks stored as `Unlabeled`.
    Relabel {
        tenant: String,
        #[arg(long, default_value = "1000")]
        limit: usize,
    },

    /// Embed chunks stored without a vector.
    Embed {
        tenant: String,
        #[arg(long, default_value = "10000")]
        limit: usize,
    },

    /// Show document, chunk, label and embedding counts.
    Stats {
        tenant: String,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tenant_rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
        config::Config::minimal()
    };

    match cli.command {
        Commands::Ingest { tenant, dir } => {
            commands::run_ingest(&cfg, &tenant, dir.as_deref()).await?;
        }
        Commands::Search { tenant, query } => {
            commands::run_search(&cfg, &tenant, &query).await?;
        }
        Commands::Ask { tenant, query } => {
            commands::run_ask(&cfg, &tenant, &query).await?;
        }
        Commands::Chat { tenant } => {
            commands::run_chat(&cfg, &tenant).await?;
        }
        Commands::Faq {
            tenant,
            question,
            answer,
        } => {
            commands::run_faq(&cfg, &tenant, &question, &answer).await?;
        }
        Commands::Manual { tenant, text, file } => {
            commands::run_manual(&cfg, &tenant, text.as_deref(), file.as_deref()).await?;
        }
        Commands::ImportCrawl { tenant, file } => {
            commands::run_import_crawl(&cfg, &tenant, &file).await?;
        }
        Commands::Upload { tenant, file } => {
            commands::run_upload(&cfg, &tenant, &file)?;
        }
        Commands::Finalize { tenant } => {
            commands::run_finalize(&cfg, &tenant).await?;
        }
        Commands::Relabel { tenant, limit } => {
            commands::run_relabel(&cfg, &tenant, limit).await?;
        }
        Commands::Embed { tenant, limit } => {
            commands::run_embed(&cfg, &tenant, limit).await?;
        }
        Commands::Stats { tenant, json } => {
            commands::run_stats(&cfg, &tenant, json).await?;
        }
    }

    Ok(())
}
