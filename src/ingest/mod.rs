// src/ingest/mod.rs
pub mod config;
pub mod fetch;
pub mod pipeline;
pub mod planner;
pub mod providers;
pub mod query;
pub mod sources;
pub mod store;
pub mod types;

use std::time::Duration;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::ingest::config::IngestConfig;
use crate::ingest::fetch::{HttpFetcher, StopFlag};
use crate::ingest::pipeline::{IngestPipeline, RunSummary};
use crate::ingest::sources::SourceRegistry;
use crate::ingest::store::ListingStore;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_requests_total", "Upstream requests issued, by source.");
        describe_counter!(
            "ingest_request_errors_total",
            "Requests that failed with a transport error or non-2xx status."
        );
        describe_counter!(
            "ingest_malformed_responses_total",
            "Successful responses whose body was not valid JSON."
        );
        describe_counter!("ingest_listings_stored_total", "New listings written to disk.");
        describe_counter!(
            "ingest_listings_duplicate_total",
            "Listings skipped because their key is already indexed."
        );
        describe_counter!(
            "ingest_listings_skipped_total",
            "Listings dropped before storage (no id, bad shape, no date)."
        );
        describe_counter!("ingest_runs_total", "Completed ingest runs.");
        describe_histogram!("ingest_fetch_ms", "Upstream request latency in milliseconds.");
        describe_gauge!("ingest_index_entries", "Entries in the listing index.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when the ingest pipeline last finished.");
    });
}

/// Build everything from `cfg` and run one ingestion pass over HTTP.
pub async fn run_once(cfg: &IngestConfig, stop: StopFlag) -> anyhow::Result<RunSummary> {
    ensure_metrics_described();

    let sources = SourceRegistry::build(cfg, &mut rand::rng());
    let fetcher = HttpFetcher::new(Duration::from_secs(cfg.request_timeout_secs))?;
    let mut store = ListingStore::open(&cfg.data_dir, &cfg.index_path, cfg.unknown_date_policy)?;
    let window = cfg.date_range_today();
    tracing::info!(start = %window.0, end = %window.1, location = %cfg.location, "resolved window");

    let pipeline = IngestPipeline::from_config(fetcher, sources, cfg, window).with_stop_flag(stop);
    Ok(pipeline.run(&mut store).await?)
}
