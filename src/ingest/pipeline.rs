// src/ingest/pipeline.rs
//! Drives one ingestion run: segment-major walk over the window plan, one
//! concurrent fetch per source for each (segment, offset) pair, then
//! normalization and persistence on the controlling task.

use chrono::NaiveDateTime;
use metrics::{counter, gauge};
use serde::Serialize;

use crate::error::Result;
use crate::ingest::config::IngestConfig;
use crate::ingest::fetch::{pause, FetchExecutor, Fetcher, Pacing, StopFlag};
use crate::ingest::planner::WindowPlan;
use crate::ingest::providers;
use crate::ingest::store::{ListingStore, PersistOutcome};
use crate::ingest::types::{SourceConfig, TimeSegment};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub pairs: usize,
    pub requests: usize,
    pub failed_responses: usize,
    pub fetched: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub skipped_undated: usize,
    /// Stopped by the stop flag or the listing cap before the plan was exhausted.
    pub stopped: bool,
}

#[derive(Debug, Default)]
struct PairOutcome {
    requests: usize,
    failed: usize,
    fetched: usize,
    stored: usize,
    duplicates: usize,
    skipped_undated: usize,
}

pub struct IngestPipeline<F: Fetcher> {
    executor: FetchExecutor<F>,
    sources: Vec<SourceConfig>,
    plan: WindowPlan,
    pacing: Pacing,
    stop: StopFlag,
    retry_empty_page: bool,
    max_listings: Option<usize>,
}

impl<F: Fetcher> IngestPipeline<F> {
    pub fn new(fetcher: F, sources: Vec<SourceConfig>, plan: WindowPlan) -> Self {
        Self {
            executor: FetchExecutor::new(fetcher),
            sources,
            plan,
            pacing: Pacing::NONE,
            stop: StopFlag::new(),
            retry_empty_page: false,
            max_listings: None,
        }
    }

    /// Pipeline for `[start, end]` with the knobs from `cfg`.
    pub fn from_config(
        fetcher: F,
        sources: Vec<SourceConfig>,
        cfg: &IngestConfig,
        (start, end): (NaiveDateTime, NaiveDateTime),
    ) -> Self {
        let plan = WindowPlan::new(start, end, cfg.segment_count, cfg.offset_steps, cfg.page_size);
        Self::new(fetcher, sources, plan)
            .with_pacing(Pacing {
                offset_delay_ms: (cfg.offset_delay_ms[0], cfg.offset_delay_ms[1]),
                segment_delay_ms: (cfg.segment_delay_ms[0], cfg.segment_delay_ms[1]),
            })
            .with_retry_empty_page(cfg.retry_empty_page)
            .with_max_listings(cfg.max_listings)
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_retry_empty_page(mut self, retry: bool) -> Self {
        self.retry_empty_page = retry;
        self
    }

    pub fn with_max_listings(mut self, max: Option<usize>) -> Self {
        self.max_listings = max;
        self
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn plan(&self) -> &WindowPlan {
        &self.plan
    }

    /// Run the whole plan against `store`. Only persistence failures abort.
    pub async fn run(&self, store: &mut ListingStore) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        if self.sources.iter().all(|s| !s.enabled) {
            tracing::warn!("no enabled sources; nothing to fetch");
            return Ok(summary);
        }
        tracing::info!(
            sources = self.sources.len(),
            segments = self.plan.segments.len(),
            offsets = self.plan.offsets.len(),
            "ingest run started"
        );

        'segments: for (seg_idx, segment) in self.plan.segments.iter().enumerate() {
            if seg_idx > 0 {
                pause(self.pacing.segment_delay()).await;
            }
            for (off_idx, &offset) in self.plan.offsets.iter().enumerate() {
                if self.should_stop(&summary) {
                    summary.stopped = true;
                    break 'segments;
                }
                if off_idx > 0 {
                    pause(self.pacing.offset_delay()).await;
                }

                let mut outcome = self.run_pair(segment, offset, store).await?;
                if outcome.stored == 0 && outcome.duplicates == 0 && self.retry_empty_page {
                    tracing::debug!(segment_start = %segment.start, offset, "empty page; retrying once");
                    summary.absorb(&outcome);
                    pause(self.pacing.offset_delay()).await;
                    outcome = self.run_pair(segment, offset, store).await?;
                }
                summary.absorb(&outcome);

                if outcome.stored == 0 {
                    tracing::debug!(
                        segment_start = %segment.start,
                        offset,
                        "no new listings; moving to next segment"
                    );
                    break;
                }
            }
        }

        store.flush()?;
        counter!("ingest_runs_total").increment(1);
        gauge!("ingest_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            pairs = summary.pairs,
            requests = summary.requests,
            failed = summary.failed_responses,
            fetched = summary.fetched,
            stored = summary.stored,
            duplicates = summary.duplicates,
            skipped_undated = summary.skipped_undated,
            stopped = summary.stopped,
            "ingest run finished"
        );
        Ok(summary)
    }

    fn should_stop(&self, summary: &RunSummary) -> bool {
        if self.stop.is_stopped() {
            tracing::info!("stop requested; ending run at pair boundary");
            return true;
        }
        if let Some(max) = self.max_listings {
            if summary.stored >= max {
                tracing::info!(max, "listing cap reached");
                return true;
            }
        }
        false
    }

    /// Fetch one pair (join barrier), then normalize and persist in source
    /// priority order. The index is flushed before returning.
    async fn run_pair(
        &self,
        segment: &TimeSegment,
        offset: u32,
        store: &mut ListingStore,
    ) -> Result<PairOutcome> {
        let responses = self.executor.execute_pair(&self.sources, segment, offset).await;
        let mut out = PairOutcome {
            requests: responses.len(),
            ..Default::default()
        };

        let enabled = self.sources.iter().filter(|s| s.enabled);
        for (source, raw) in enabled.zip(responses.iter()) {
            if !raw.is_success() {
                out.failed += 1;
                continue;
            }
            let records = providers::normalize(source, raw);
            out.fetched += records.len();
            for record in &records {
                match store.persist(record)? {
                    PersistOutcome::Stored(path) => {
                        out.stored += 1;
                        tracing::debug!(key = %record.dedup_key(), file = %path.display(), "stored listing");
                    }
                    PersistOutcome::Duplicate => out.duplicates += 1,
                    PersistOutcome::SkippedUndated => out.skipped_undated += 1,
                }
            }
        }

        store.flush()?;
        tracing::info!(
            segment_start = %segment.start,
            segment_end = %segment.end,
            offset,
            fetched = out.fetched,
            stored = out.stored,
            duplicates = out.duplicates,
            "pair processed"
        );
        Ok(out)
    }
}

impl RunSummary {
    fn absorb(&mut self, o: &PairOutcome) {
        self.pairs += 1;
        self.requests += o.requests;
        self.failed_responses += o.failed;
        self.fetched += o.fetched;
        self.stored += o.stored;
        self.duplicates += o.duplicates;
        self.skipped_undated += o.skipped_undated;
    }
}
