//! # RAG Harness CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag chunk` | Chunk the corpus and report per-document counts |
//! | `rag stats` | Chunk quality report |
//! | `rag index build` | Chunk, embed and persist the vector index |
//! | `rag index info` | Show the persisted index header |
//! | `rag search "<query>"` | Ranked chunk hits for a query |
//! | `rag ask "<question>"` | Retrieve evidence and compose an answer |
//!
//! Logging goes to stderr through `env_logger`; set `RUST_LOG=info` (or
//! `debug`) for build and retrieval details.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use rag_harness::{config, index_cmd, query_cmd, stats};

/// RAG Harness CLI: chunk, index, and question a document corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "Chunk, embed, and retrieve grounded context from a document corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk the corpus and print per-document chunk counts.
    Chunk {
        /// Write chunks (with the window parameters) to this JSON file.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Report chunk size distribution and quality issues.
    Stats,

    /// Build or inspect the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Print ranked chunks for a query, before threshold and budget.
    Search {
        query: String,

        /// Number of hits (defaults to retrieval.top_k).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a question from retrieved evidence.
    Ask { question: String },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Chunk, embed, and persist the corpus index.
    Build,
    /// Show the persisted index header.
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Chunk { out } => {
            index_cmd::run_chunk(&cfg, out.as_deref())?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Index { action } => match action {
            IndexAction::Build => {
                index_cmd::run_index_build(&cfg).await?;
            }
            IndexAction::Info => {
                index_cmd::run_index_info(&cfg)?;
            }
        },
        Commands::Search { query, top_k } => {
            query_cmd::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Ask { question } => {
            query_cmd::run_ask(&cfg, &question).await?;
        }
    }

    Ok(())
}
