// tests/ingest_pipeline.rs
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use job_listing_ingest::ingest::fetch::Fetcher;
use job_listing_ingest::ingest::planner::WindowPlan;
use job_listing_ingest::ingest::types::{FetchRequest, RawResponse};
use job_listing_ingest::{
    IngestError, IngestPipeline, ListingStore, SourceConfig, SourceKind, UnknownDatePolicy,
};
use serde_json::json;

/// Serves a fixed body per (source, offset); anything else is an empty page.
#[derive(Clone, Default)]
struct Scripted {
    pages: Arc<HashMap<(String, u32), RawResponse>>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(pages: Vec<((&str, u32), RawResponse)>) -> Self {
        Self {
            pages: Arc::new(
                pages
                    .into_iter()
                    .map(|((s, o), r)| ((s.to_string(), o), r))
                    .collect(),
            ),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for Scripted {
    async fn fetch(&self, req: &FetchRequest) -> RawResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let offset: u32 = req
            .params
            .get("offset")
            .or_else(|| req.params.get("start"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        self.pages
            .get(&(req.source_name.clone(), offset))
            .cloned()
            .unwrap_or_else(|| RawResponse::ok(&req.source_name, 200, r#"{"hits": []}"#))
    }
}

fn source(name: &str, kind: SourceKind, priority: i32) -> SourceConfig {
    SourceConfig {
        name: name.into(),
        kind,
        enabled: true,
        priority,
        url_template: format!("http://upstream.test/{name}"),
        headers: Default::default(),
        static_params: Default::default(),
    }
}

fn jobtech_page(ids: &[u64]) -> RawResponse {
    let hits: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id.to_string(),
                "headline": format!("Utvecklare {id}"),
                "publication_date": "2024-02-01T08:30:00",
                "employer": { "name": "Acme AB" },
                "workplace_address": { "municipality": "Stockholm" },
                "description": { "text": "Vi söker dig." }
            })
        })
        .collect();
    RawResponse::ok("platsbanken", 200, json!({ "hits": hits }).to_string())
}

fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn plan() -> WindowPlan {
    WindowPlan::new(day(2024, 1, 1), day(2024, 3, 1), 2, 3, 20)
}

fn open_store(root: &Path) -> ListingStore {
    ListingStore::open(
        root.join("listings"),
        root.join("listing_index.json"),
        UnknownDatePolicy::Keep,
    )
    .unwrap()
}

fn txt_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .is_some_and(|x| x == "txt")
        })
        .count()
}

#[tokio::test]
async fn second_run_over_same_window_stores_nothing_new() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Scripted::new(vec![(("platsbanken", 0), jobtech_page(&[123]))]);
    let sources = vec![source("platsbanken", SourceKind::Platsbanken, 1)];

    let mut store = open_store(tmp.path());
    let pipeline = IngestPipeline::new(fetcher.clone(), sources.clone(), plan());
    let first = pipeline.run(&mut store).await.unwrap();
    assert_eq!(first.stored, 1);

    let file = tmp.path().join("listings/platsbanken_20240201_123.txt");
    let content = fs::read_to_string(&file).unwrap();
    assert!(content.starts_with("Source: platsbanken\nDate: 2024-02-01T08:30:00\nID: 123\n"));
    assert!(content.contains(&format!("{}\n\nUtvecklare 123\nAcme AB\n\nVi söker dig.", "-".repeat(50))));

    let index: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join("listing_index.json")).unwrap()).unwrap();
    assert_eq!(index["platsbanken_123"]["date"], "20240201");
    assert_eq!(index["platsbanken_123"]["source"], "platsbanken");
    assert_eq!(index["platsbanken_123"]["id"], "123");

    // Fresh store handle, as a new process would see it.
    let mut store = open_store(tmp.path());
    let pipeline = IngestPipeline::new(fetcher, sources, plan());
    let second = pipeline.run(&mut store).await.unwrap();
    assert_eq!(second.stored, 0);
    assert!(second.duplicates >= 1);
    assert_eq!(txt_files(&tmp.path().join("listings")), 1);
    assert_eq!(store.index().len(), 1);
}

#[tokio::test]
async fn empty_page_moves_on_to_next_segment() {
    let tmp = tempfile::tempdir().unwrap();
    // Same pages for every segment; offset 40 is empty.
    let fetcher = Scripted::new(vec![
        (("platsbanken", 0), jobtech_page(&[1, 2])),
        (("platsbanken", 20), jobtech_page(&[3])),
    ]);
    let mut store = open_store(tmp.path());
    let pipeline = IngestPipeline::new(
        fetcher.clone(),
        vec![source("platsbanken", SourceKind::Platsbanken, 1)],
        plan(),
    );
    let summary = pipeline.run(&mut store).await.unwrap();

    // Segment 1: offsets 0, 20 store; 40 is empty -> next segment.
    // Segment 2: offset 0 is all duplicates -> done.
    assert_eq!(summary.stored, 3);
    assert_eq!(summary.pairs, 4);
    assert_eq!(fetcher.calls(), 4);
    assert!(!summary.stopped);
}

#[tokio::test]
async fn failing_source_does_not_abort_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Scripted::new(vec![
        (("platsbanken", 0), jobtech_page(&[7])),
        (("indeed", 0), RawResponse::ok("indeed", 503, "unavailable")),
        (("job_posting_feed", 0), RawResponse::transport_failure("job_posting_feed", "timed out")),
    ]);
    let sources = vec![
        source("platsbanken", SourceKind::Platsbanken, 1),
        source("indeed", SourceKind::Indeed, 2),
        source("job_posting_feed", SourceKind::JobPostingFeed, 3),
    ];
    let mut store = open_store(tmp.path());
    let summary = IngestPipeline::new(fetcher, sources, plan())
        .run(&mut store)
        .await
        .unwrap();

    assert_eq!(summary.stored, 1);
    assert!(summary.failed_responses >= 2);
    assert!(store.is_duplicate("platsbanken", "7"));
}

#[tokio::test]
async fn stop_flag_is_honoured_at_pair_boundary() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Scripted::new(vec![(("platsbanken", 0), jobtech_page(&[1]))]);
    let pipeline = IngestPipeline::new(
        fetcher.clone(),
        vec![source("platsbanken", SourceKind::Platsbanken, 1)],
        plan(),
    );
    pipeline.stop_flag().request_stop();

    let mut store = open_store(tmp.path());
    let summary = pipeline.run(&mut store).await.unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.pairs, 0);
    assert_eq!(fetcher.calls(), 0);
    assert!(store.index().is_empty());
}

#[tokio::test]
async fn listing_cap_stops_after_the_pair_that_reaches_it() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Scripted::new(vec![
        (("platsbanken", 0), jobtech_page(&[1, 2, 3])),
        (("platsbanken", 20), jobtech_page(&[4, 5, 6])),
    ]);
    let mut store = open_store(tmp.path());
    let summary = IngestPipeline::new(
        fetcher,
        vec![source("platsbanken", SourceKind::Platsbanken, 1)],
        plan(),
    )
    .with_max_listings(Some(2))
    .run(&mut store)
    .await
    .unwrap();

    assert!(summary.stopped);
    assert_eq!(summary.pairs, 1);
    assert_eq!(summary.stored, 3);
}

#[tokio::test]
async fn retry_empty_page_refetches_once() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Scripted::new(vec![]);
    let mut store = open_store(tmp.path());
    let summary = IngestPipeline::new(
        fetcher.clone(),
        vec![source("platsbanken", SourceKind::Platsbanken, 1)],
        WindowPlan::new(day(2024, 1, 1), day(2024, 1, 2), 1, 3, 20),
    )
    .with_retry_empty_page(true)
    .run(&mut store)
    .await
    .unwrap();

    assert_eq!(fetcher.calls(), 2);
    assert_eq!(summary.stored, 0);
}

#[tokio::test]
async fn disabled_sources_are_not_fetched() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Scripted::new(vec![(("platsbanken", 0), jobtech_page(&[1]))]);
    let mut off = source("platsbanken", SourceKind::Platsbanken, 1);
    off.enabled = false;

    let mut store = open_store(tmp.path());
    let summary = IngestPipeline::new(fetcher.clone(), vec![off], plan())
        .run(&mut store)
        .await
        .unwrap();
    assert_eq!(summary.pairs, 0);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn unwritable_store_aborts_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open_store(tmp.path());
    // Replace the listing directory with a plain file.
    let dir = tmp.path().join("listings");
    fs::remove_dir(&dir).unwrap();
    fs::write(&dir, b"not a directory").unwrap();

    let fetcher = Scripted::new(vec![(("platsbanken", 0), jobtech_page(&[9]))]);
    let err = IngestPipeline::new(
        fetcher,
        vec![source("platsbanken", SourceKind::Platsbanken, 1)],
        plan(),
    )
    .run(&mut store)
    .await
    .unwrap_err();

    assert!(matches!(err, IngestError::Persistence { .. }), "{err:?}");
    assert!(err.is_fatal());
}
