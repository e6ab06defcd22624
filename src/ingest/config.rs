// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::planner::{MAX_OFFSET_STEPS, MAX_SEGMENTS};
use crate::ingest::store::UnknownDatePolicy;

const ENV_PATH: &str = "INGEST_CONFIG_PATH";
const ENV_LOCATION: &str = "INGEST_LOCATION";
const ENV_START_DATE: &str = "INGEST_START_DATE";
const ENV_END_DATE: &str = "INGEST_END_DATE";
const ENV_SOURCES: &str = "INGEST_SOURCES";
const ENV_API_KEY: &str = "RAPID_API_KEY";

fn default_query() -> String {
    "utvecklare".to_string()
}
fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default()
}

fn default_source_toggles() -> BTreeMap<String, bool> {
    BTreeMap::from([
        ("platsbanken".to_string(), true),
        ("platsbanken_historical".to_string(), false),
        ("indeed".to_string(), true),
        ("job_posting_feed".to_string(), true),
    ])
}

/// Knobs for one ingestion run. Everything the UI/config layer supplies ends
/// up here as plain values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Free-text location filter; empty means "anywhere".
    pub location: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Base keyword query, used when `sample_terms == 0`.
    pub query: String,
    /// Number of role terms to sample from the built-in vocabulary per run.
    pub sample_terms: usize,
    /// Enable map keyed by source name. Unknown names are ignored.
    pub sources: BTreeMap<String, bool>,
    /// Optional allow-list of source names; empty allows every enabled source.
    pub allow_list: Vec<String>,
    /// Additional API URLs with no known schema.
    pub extra_apis: Vec<String>,
    pub segment_count: u32,
    pub offset_steps: u32,
    pub page_size: u32,
    pub max_listings: Option<usize>,
    pub request_timeout_secs: u64,
    /// Jitter range between offset steps, `[min, max]` milliseconds.
    pub offset_delay_ms: [u64; 2],
    /// Jitter range between segments, `[min, max]` milliseconds.
    pub segment_delay_ms: [u64; 2],
    pub retry_empty_page: bool,
    pub unknown_date_policy: UnknownDatePolicy,
    pub data_dir: PathBuf,
    pub index_path: PathBuf,
    /// RapidAPI key, only ever read from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            start_date: None,
            end_date: None,
            query: default_query(),
            sample_terms: 0,
            sources: default_source_toggles(),
            allow_list: Vec::new(),
            extra_apis: Vec::new(),
            segment_count: 4,
            offset_steps: 5,
            page_size: 20,
            max_listings: None,
            request_timeout_secs: 30,
            offset_delay_ms: [500, 1_500],
            segment_delay_ms: [2_000, 4_000],
            retry_empty_page: false,
            unknown_date_policy: UnknownDatePolicy::default(),
            data_dir: PathBuf::from("data/listings"),
            index_path: PathBuf::from("data/listing_index.json"),
            api_key: None,
        }
    }
}

impl IngestConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing ingest config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $INGEST_CONFIG_PATH
    /// 2) config/ingest.toml
    /// 3) config/ingest.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/ingest.toml");
            let json_p = PathBuf::from("config/ingest.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        base.with_env_overrides()
    }

    /// Apply `INGEST_*` overrides and pick up the API key.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(loc) = std::env::var(ENV_LOCATION) {
            self.location = loc.trim().to_string();
        }
        if let Ok(d) = std::env::var(ENV_START_DATE) {
            self.start_date = Some(parse_date(&d).with_context(|| format!("{ENV_START_DATE}={d}"))?);
        }
        if let Ok(d) = std::env::var(ENV_END_DATE) {
            self.end_date = Some(parse_date(&d).with_context(|| format!("{ENV_END_DATE}={d}"))?);
        }
        if let Ok(list) = std::env::var(ENV_SOURCES) {
            self.allow_list = clean_list(list.split(',').map(str::to_string).collect());
        }
        self.api_key = std::env::var(ENV_API_KEY)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        Ok(self.sanitized())
    }

    /// Clamp counts and order delay ranges so downstream code never sees nonsense.
    pub fn sanitized(mut self) -> Self {
        self.segment_count = self.segment_count.clamp(1, MAX_SEGMENTS);
        self.offset_steps = self.offset_steps.clamp(1, MAX_OFFSET_STEPS);
        self.page_size = self.page_size.max(1);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        for range in [&mut self.offset_delay_ms, &mut self.segment_delay_ms] {
            if range[0] > range[1] {
                range.swap(0, 1);
            }
        }
        self.location = self.location.trim().to_string();
        self.allow_list = clean_list(std::mem::take(&mut self.allow_list));
        self.extra_apis = clean_list(std::mem::take(&mut self.extra_apis));
        self
    }

    /// Resolved `[start, end]` window. Falls back to 2025-01-01 → `today`
    /// unless both dates are set and `start < end`.
    pub fn date_range(&self, today: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let (start, end) = match (self.start_date, self.end_date) {
            (Some(s), Some(e)) if s < e => (s, e),
            (Some(s), None) if s < today => (s, today),
            (None, Some(e)) if default_start_date() < e => (default_start_date(), e),
            (None, None) => (default_start_date(), today),
            _ => {
                tracing::warn!(
                    start = ?self.start_date,
                    end = ?self.end_date,
                    "invalid date range; using default window"
                );
                (default_start_date(), today)
            }
        };
        (start.and_time(Default::default()), end.and_time(Default::default()))
    }

    pub fn date_range_today(&self) -> (NaiveDateTime, NaiveDateTime) {
        self.date_range(Local::now().date_naive())
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| anyhow!("expected YYYY-MM-DD: {e}"))
}

fn parse_config(s: &str, hint_ext: &str) -> Result<IngestConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    if hint_ext == "toml" {
        return Ok(toml::from_str(s)?);
    }
    // Unknown extension: JSON documents start with '{'.
    if s.trim_start().starts_with('{') {
        Ok(serde_json::from_str(s)?)
    } else {
        Ok(toml::from_str(s)?)
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_string());
        }
    }
    set.into_iter().collect()
}
