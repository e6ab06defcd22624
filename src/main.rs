//! Job listing ingest: binary entrypoint.
//! Runs one ingestion pass, or inspects and maintains the stored listings.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use job_listing_ingest::ingest::run_once;
use job_listing_ingest::metrics::Metrics;
use job_listing_ingest::{IngestConfig, ListingFilter, ListingRef, ListingStore, StopFlag};

#[derive(Parser, Debug)]
#[command(name = "job-listing-ingest")]
#[command(author, version, about = "Fetch job listings from several job boards into a local store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch listings for the configured window (default)
    Run,
    /// Print index entries as JSON
    List(FilterArgs),
    /// Print the body of one stored listing
    Show {
        /// Source name, e.g. `platsbanken`
        source: String,
        /// Upstream listing id
        id: String,
    },
    /// Delete stored listings and their index entries
    Clear(FilterArgs),
    /// Copy stored listing files into a directory
    Export {
        /// Destination directory
        dest: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Keep only these sources (repeatable)
    #[arg(long = "source")]
    sources: Vec<String>,
    /// First publication day, YYYY-MM-DD
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last publication day, YYYY-MM-DD
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Case-insensitive location substring
    #[arg(long)]
    location: Option<String>,
}

impl FilterArgs {
    /// `None` when no flag was given.
    fn to_filter(&self) -> Option<ListingFilter> {
        if self.sources.is_empty()
            && self.from.is_none()
            && self.to.is_none()
            && self.location.is_none()
        {
            return None;
        }
        Some(ListingFilter {
            sources: (!self.sources.is_empty()).then(|| self.sources.iter().cloned().collect()),
            date_from: self.from,
            date_to: self.to,
            location: self.location.clone(),
        })
    }
}

/// Compact logs by default, JSON lines with INGEST_LOG_JSON=1.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "job_listing_ingest=debug,warn"
    } else {
        "job_listing_ingest=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let json = std::env::var("INGEST_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; missing file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = IngestConfig::load_default().context("loading ingest config")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cfg).await?,
        Command::List(args) => {
            let store = open_store(&cfg)?;
            let entries = store.get_saved_listings(args.to_filter().as_ref());
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Show { source, id } => {
            let store = open_store(&cfg)?;
            let content = store.get_listing_content(ListingRef::Key {
                source: &source,
                external_id: &id,
            })?;
            match content {
                Some(body) => println!("{body}"),
                None => anyhow::bail!("no stored listing {source}_{id}"),
            }
        }
        Command::Clear(args) => {
            let mut store = open_store(&cfg)?;
            let removed = store.clear_listings(args.to_filter().as_ref())?;
            println!("removed {removed} listing file(s)");
        }
        Command::Export { dest, filter } => {
            let store = open_store(&cfg)?;
            let copied = store.export_listings(&dest, filter.to_filter().as_ref())?;
            println!("exported {copied} listing file(s) to {}", dest.display());
        }
    }
    Ok(())
}

async fn run(cfg: &IngestConfig) -> Result<()> {
    if let Ok(addr) = std::env::var("INGEST_METRICS_ADDR") {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("INGEST_METRICS_ADDR={addr}"))?;
        Metrics::serve(addr)?;
    }

    let stop = StopFlag::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing current pair");
                stop.request_stop();
            }
        });
    }

    let summary = run_once(cfg, stop).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn open_store(cfg: &IngestConfig) -> Result<ListingStore> {
    Ok(ListingStore::open(
        &cfg.data_dir,
        &cfg.index_path,
        cfg.unknown_date_policy,
    )?)
}
