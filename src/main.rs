//! # AInsights CLI (`ainsights`)
//!
//! ## Usage
//!
//! ```bash
//! ainsights --config ./config/ainsights.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ainsights ingest [paths...]` | Chunk, embed, and index documents |
//! | `ainsights remove <id>` | Remove a document from the index |
//! | `ainsights search "<query>"` | Show the nearest segments |
//! | `ainsights ask "<query>"` | Answer one question |
//! | `ainsights chat` | Interactive question session |
//! | `ainsights stats --dataset <csv>` | Print live dataset statistics |
//! | `ainsights info` | Describe the index |
//! | `ainsights rebuild` | Re-embed the index with the configured model |

use ainsights::progress::ProgressMode;
use ainsights::stats::Filter;
use ainsights::{config, ingest, query, stats, store};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// AInsights: grounded answers over business data and reports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ainsights.example.toml`.
#[derive(Parser)]
#[command(
    name = "ainsights",
    about = "Grounded question answering over live business data and ingested reports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ainsights.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into the index.
    ///
    /// Without paths, scans `[connectors.filesystem]`. Directories are
    /// scanned with the connector's globs; files are ingested as given.
    /// Document ids are paths relative to the connector root for files
    /// under it, and the path as given otherwise. Re-ingesting a document
    /// id replaces its previous segments; unreadable files are reported as
    /// failed documents.
    Ingest {
        paths: Vec<PathBuf>,

        /// Progress on stderr: off, human, or json. Defaults to human on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Remove a document and all its segments.
    Remove {
        /// Document id as shown by `ainsights info`.
        id: String,
    },

    /// Show the segments nearest to a query.
    Search {
        query: String,

        #[arg(long, short, default_value = "5")]
        k: usize,
    },

    /// Answer a question from the dataset and the indexed documents.
    Ask {
        query: String,

        /// CSV dataset providing live statistics.
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Equality filter on the dataset, `COLUMN=VALUE`. Repeatable.
        #[arg(long = "filter", value_name = "COLUMN=VALUE")]
        filters: Vec<Filter>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask questions interactively; history is kept for the session.
    Chat {
        #[arg(long)]
        dataset: Option<PathBuf>,

        #[arg(long = "filter", value_name = "COLUMN=VALUE")]
        filters: Vec<Filter>,
    },

    /// Print the statistics a question would be grounded on.
    Stats {
        #[arg(long)]
        dataset: PathBuf,

        #[arg(long = "filter", value_name = "COLUMN=VALUE")]
        filters: Vec<Filter>,
    },

    /// Show index location, model, and contents.
    Info,

    /// Regenerate every embedding with the configured model.
    Rebuild,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ainsights=info,ainsights_core=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // `stats` runs without a config file
    let load = || config::load_config(&cli.config);

    match cli.command {
        Commands::Stats { dataset, filters } => {
            stats::run_stats(&dataset, &filters)?;
        }
        Commands::Ingest { paths, progress } => {
            let cfg = load()?;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, &paths, mode).await?;
        }
        Commands::Remove { id } => {
            let cfg = load()?;
            store::run_remove(&cfg, &id)?;
        }
        Commands::Search { query, k } => {
            let cfg = load()?;
            query::run_search(&cfg, &query, k).await?;
        }
        Commands::Ask {
            query,
            dataset,
            filters,
            json,
        } => {
            let cfg = load()?;
            query::run_ask(&cfg, &query, dataset.as_deref(), &filters, json).await?;
        }
        Commands::Chat { dataset, filters } => {
            let cfg = load()?;
            query::run_chat(&cfg, dataset.as_deref(), &filters).await?;
        }
        Commands::Info => {
            let cfg = load()?;
            store::run_info(&cfg)?;
        }
        Commands::Rebuild => {
            let cfg = load()?;
            store::run_rebuild(&cfg).await?;
        }
    }

    Ok(())
}
