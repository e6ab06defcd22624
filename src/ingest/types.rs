// src/ingest/types.rs
use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Placeholder date bucket for listings without a parsable publication date.
pub const UNKNOWN_DATE_BUCKET: &str = "unknown_date";

/// The closed set of upstream integrations. Each variant knows its own
/// request parameters (see `sources`) and response schema (see `providers`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Platsbanken,
    PlatsbankenHistorical,
    Indeed,
    JobPostingFeed,
    Custom,
}

/// How a source accepts a date window, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateParamStyle {
    /// `published-after` / `published-before`
    PublishedRange,
    /// `historical-from` / `historical-to`
    HistoricalRange,
    None,
}

/// One upstream API, fully resolved for a run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub enabled: bool,
    pub priority: i32,
    pub url_template: String,
    pub headers: BTreeMap<String, String>,
    pub static_params: BTreeMap<String, String>,
}

/// A contiguous sub-range of the overall date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSegment {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// A ready-to-send GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub source_name: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
}

/// Result of one `FetchRequest`. Failures are carried as state, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub source_name: String,
    /// `None` when the request never produced an HTTP response.
    pub status_code: Option<u16>,
    pub body: String,
    pub transport_error: Option<String>,
}

const ERROR_BODY_PREVIEW: usize = 200;

impl RawResponse {
    pub fn ok(source_name: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            status_code: Some(status),
            body: body.into(),
            transport_error: None,
        }
    }

    pub fn transport_failure(source_name: impl Into<String>, err: impl ToString) -> Self {
        Self {
            source_name: source_name.into(),
            status_code: None,
            body: String::new(),
            transport_error: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status_code, Some(s) if (200..300).contains(&s))
    }

    /// Body of a successful response, or the classified failure.
    pub fn success_body(&self) -> Result<&str, IngestError> {
        match self.status_code {
            None => Err(IngestError::Network {
                source_name: self.source_name.clone(),
                message: self
                    .transport_error
                    .clone()
                    .unwrap_or_else(|| "no response".to_string()),
            }),
            Some(_) if self.is_success() => Ok(&self.body),
            Some(status) => Err(IngestError::Upstream {
                source_name: self.source_name.clone(),
                status,
                body: self.body.chars().take(ERROR_BODY_PREVIEW).collect(),
            }),
        }
    }
}

/// Canonical, source-independent listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub external_id: String,
    pub source: String,
    pub published_at: Option<NaiveDateTime>,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl ListingRecord {
    /// `"{source}_{external_id}"`, the identity of a listing across the store.
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.source, &self.external_id)
    }

    /// `YYYYMMDD`, or `unknown_date` for unresolved timestamps.
    pub fn date_bucket(&self) -> String {
        self.published_at
            .map(|ts| ts.format("%Y%m%d").to_string())
            .unwrap_or_else(|| UNKNOWN_DATE_BUCKET.to_string())
    }
}

pub fn dedup_key(source: &str, external_id: &str) -> String {
    format!("{source}_{external_id}")
}
