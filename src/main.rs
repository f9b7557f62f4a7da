//! # TLS Harvest CLI (`tlsh`)
//!
//! The `tlsh` binary pulls raw scan results from a TLS-assessment API and
//! appends them, annotated with ingestion metadata, to a local SQLite
//! document store. It is strictly fetch, annotate, store: no read path, no
//! dedup, no scheduling.
//!
//! ## Usage
//!
//! ```bash
//! tlsh --config ./config/tlsh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tlsh init` | Create the SQLite database and collection tables |
//! | `tlsh info` | Fetch `/info` and store the raw response |
//! | `tlsh analyze <host>` | Fetch `/analyze` for a host and store the raw response |
//! | `tlsh endpoint <host> --ip <ip>` | Fetch `/getEndpointData` and store the raw response |
//! | `tlsh batch <file>` | Analyze every host in a newline-delimited file |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the store
//! tlsh init
//!
//! # Cached assessment for one host
//! tlsh analyze example.com
//!
//! # Force a fresh scan, bypassing the remote cache
//! tlsh analyze example.com --start-new --no-cache
//!
//! # Per-endpoint detail
//! tlsh endpoint example.com --ip 93.184.216.34
//!
//! # Walk a host list with a 2s courtesy pause between calls
//! tlsh batch hosts.txt --wait-between 2
//! ```

mod config;
mod fetch;
mod shapes;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::HttpFetcher;
use crate::store::{RawStore, SqliteStore};

/// TLS Harvest — an extraction-load connector for a TLS-assessment API.
#[derive(Parser)]
#[command(
    name = "tlsh",
    about = "TLS Harvest — fetch raw TLS assessment results and store them",
    version,
    long_about = "TLS Harvest pulls scan results from a TLS-assessment API (service info, \
    per-host analysis, per-endpoint detail) and appends the raw JSON responses, annotated \
    with ingestion metadata, to a local SQLite document store."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Every setting has a default; a missing file runs with defaults.
    #[arg(long, global = true, default_value = "./config/tlsh.toml")]
    config: PathBuf,

    /// Seconds to pause after each remote call (rate-limiting courtesy).
    #[arg(long, global = true, default_value_t = 1.0)]
    wait_between: f64,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the document store.
    ///
    /// Creates the SQLite database file and the three collection tables
    /// (info_raw, analyze_raw, endpoint_raw). Idempotent.
    Init,

    /// Fetch service info (`/info`, no parameters) and store the raw response.
    Info,

    /// Fetch the assessment for one host (`/analyze`) and store the raw response.
    ///
    /// When the response lists per-endpoint summaries, each summary is also
    /// stored individually in the endpoint collection.
    Analyze {
        /// Hostname to assess.
        host: String,

        /// Force a fresh scan instead of returning a finished one.
        #[arg(long)]
        start_new: bool,

        /// Ask the remote to bypass its result cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Fetch per-endpoint detail (`/getEndpointData`) and store the raw response.
    Endpoint {
        /// Hostname the endpoint belongs to.
        host: String,

        /// Endpoint IP address.
        #[arg(long)]
        ip: String,
    },

    /// Analyze every host in a newline-delimited file, sequentially.
    ///
    /// Per-host failures are logged and skipped; the run continues with the
    /// remaining hosts.
    Batch {
        /// Path to the host list (one hostname per line).
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    // Store unreachable at startup is fatal; nothing is fetched.
    let store = SqliteStore::connect(&cfg.store)
        .await
        .context("cannot connect to the document store")?;

    if let Commands::Init = cli.command {
        store.migrate().await?;
        println!("Store initialized successfully.");
        store.close().await;
        return Ok(());
    }

    store
        .ping()
        .await
        .context("document store unreachable at startup")?;

    let fetcher = HttpFetcher::new(&cfg.api)?;
    let wait = Duration::from_secs_f64(cli.wait_between.max(0.0));

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Info => {
            shapes::run_info(&fetcher, &store).await?;
            shapes::polite_wait(wait).await;
        }
        Commands::Analyze {
            host,
            start_new,
            no_cache,
        } => {
            shapes::run_analyze(&fetcher, &store, &host, start_new, !no_cache).await?;
            shapes::polite_wait(wait).await;
        }
        Commands::Endpoint { host, ip } => {
            shapes::run_endpoint_data(&fetcher, &store, &host, &ip).await?;
            shapes::polite_wait(wait).await;
        }
        Commands::Batch { file } => {
            shapes::run_batch(&fetcher, &store, &file, wait).await?;
        }
    }

    store.close().await;
    Ok(())
}
