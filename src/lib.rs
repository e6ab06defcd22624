// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod error;
pub mod ingest;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::error::{IngestError, Result};
pub use crate::ingest::config::IngestConfig;
pub use crate::ingest::fetch::{Fetcher, HttpFetcher, StopFlag};
pub use crate::ingest::pipeline::{IngestPipeline, RunSummary};
pub use crate::ingest::query::{ListingFilter, ListingRef};
pub use crate::ingest::sources::SourceRegistry;
pub use crate::ingest::store::{DeduplicationIndex, ListingStore, UnknownDatePolicy};
pub use crate::ingest::types::{ListingRecord, SourceConfig, SourceKind, TimeSegment};
