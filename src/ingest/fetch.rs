// src/ingest/fetch.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, histogram};
use rand::Rng;

use crate::ingest::types::{FetchRequest, RawResponse, SourceConfig, TimeSegment};

/// Executes one request. Implementations must not fail: every outcome,
/// including transport errors, is reported through `RawResponse`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> RawResponse;
}

/// reqwest-backed fetcher with a per-request timeout.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("job-listing-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: &FetchRequest) -> RawResponse {
        let mut builder = self.client.get(&req.url).query(&req.params);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        let resp = match builder.send().await {
            Ok(r) => r,
            Err(e) => return RawResponse::transport_failure(&req.source_name, e),
        };
        let status = resp.status().as_u16();
        match resp.text().await {
            Ok(body) => RawResponse::ok(&req.source_name, status, body),
            Err(e) => RawResponse::transport_failure(&req.source_name, e),
        }
    }
}

/// Cooperative cancellation, checked only between (segment, offset) pairs.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Jittered sleeps between pages and between segments. Pacing only; there is
/// no backoff on errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub offset_delay_ms: (u64, u64),
    pub segment_delay_ms: (u64, u64),
}

impl Pacing {
    pub const NONE: Pacing = Pacing {
        offset_delay_ms: (0, 0),
        segment_delay_ms: (0, 0),
    };

    pub fn offset_delay(&self) -> Duration {
        jitter(self.offset_delay_ms)
    }

    pub fn segment_delay(&self) -> Duration {
        jitter(self.segment_delay_ms)
    }
}

fn jitter((min, max): (u64, u64)) -> Duration {
    if max == 0 {
        return Duration::ZERO;
    }
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

pub async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

/// Issues one request per source for a (segment, offset) pair and waits for
/// all of them before returning.
pub struct FetchExecutor<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> FetchExecutor<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Responses come back in the same order as `sources`.
    pub async fn execute_pair(
        &self,
        sources: &[SourceConfig],
        segment: &TimeSegment,
        offset: u32,
    ) -> Vec<RawResponse> {
        let requests: Vec<FetchRequest> = sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.build_request(segment, offset))
            .collect();

        let responses = join_all(requests.iter().map(|req| self.timed_fetch(req))).await;

        for resp in &responses {
            if let Err(e) = resp.success_body() {
                counter!("ingest_request_errors_total", "source" => resp.source_name.clone())
                    .increment(1);
                tracing::warn!(
                    source = %resp.source_name,
                    status = ?resp.status_code,
                    segment_start = %segment.start,
                    offset,
                    error = %e,
                    "request failed; treating as empty page"
                );
            }
        }
        responses
    }

    async fn timed_fetch(&self, req: &FetchRequest) -> RawResponse {
        let t0 = Instant::now();
        let resp = self.fetcher.fetch(req).await;
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_requests_total", "source" => req.source_name.clone()).increment(1);
        tracing::debug!(
            source = %req.source_name,
            url = %req.url,
            status = ?resp.status_code,
            bytes = resp.body.len(),
            "fetched"
        );
        resp
    }
}
