// src/ingest/sources.rs
//! Source registry: turns the run configuration into the ordered list of
//! enabled upstream APIs. Pure; no network I/O.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rand::seq::IndexedRandom;
use rand::Rng;

use crate::ingest::config::IngestConfig;
use crate::ingest::types::{DateParamStyle, FetchRequest, SourceConfig, SourceKind, TimeSegment};

/// Role vocabulary used to vary the keyword query between runs.
pub const ROLE_VOCABULARY: &[&str] = &[
    "utvecklare",
    "systemutvecklare",
    "mjukvaruutvecklare",
    "programmerare",
    "developer",
    "software developer",
    "software engineer",
    "backend developer",
    "frontend developer",
    "fullstack developer",
    "data engineer",
    "devops engineer",
];

const RAPIDAPI_KEY_HEADER: &str = "x-rapidapi-key";
const RAPIDAPI_HOST_HEADER: &str = "x-rapidapi-host";
const DATE_PARAM_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

impl SourceKind {
    pub const KNOWN: [SourceKind; 4] = [
        SourceKind::Platsbanken,
        SourceKind::PlatsbankenHistorical,
        SourceKind::Indeed,
        SourceKind::JobPostingFeed,
    ];

    pub fn default_name(self) -> &'static str {
        match self {
            SourceKind::Platsbanken => "platsbanken",
            SourceKind::PlatsbankenHistorical => "platsbanken_historical",
            SourceKind::Indeed => "indeed",
            SourceKind::JobPostingFeed => "job_posting_feed",
            SourceKind::Custom => "custom",
        }
    }

    pub fn from_name(name: &str) -> Option<SourceKind> {
        Self::KNOWN
            .into_iter()
            .find(|k| k.default_name().eq_ignore_ascii_case(name.trim()))
    }

    fn default_priority(self) -> i32 {
        match self {
            SourceKind::Platsbanken => 0,
            SourceKind::PlatsbankenHistorical => 1,
            SourceKind::Indeed => 2,
            SourceKind::JobPostingFeed => 3,
            SourceKind::Custom => 100,
        }
    }

    fn base_url(self) -> &'static str {
        match self {
            SourceKind::Platsbanken => "https://jobsearch.api.jobtechdev.se/search",
            SourceKind::PlatsbankenHistorical => "https://historical.api.jobtechdev.se/search",
            SourceKind::Indeed => "https://indeed12.p.rapidapi.com/jobs/search",
            SourceKind::JobPostingFeed => "https://job-posting-feed-api.p.rapidapi.com/active-ats-meili",
            SourceKind::Custom => "",
        }
    }

    /// Host header value for RapidAPI-backed sources.
    fn rapidapi_host(self) -> Option<&'static str> {
        match self {
            SourceKind::Indeed => Some("indeed12.p.rapidapi.com"),
            SourceKind::JobPostingFeed => Some("job-posting-feed-api.p.rapidapi.com"),
            _ => None,
        }
    }

    pub fn date_style(self) -> DateParamStyle {
        match self {
            SourceKind::Platsbanken => DateParamStyle::PublishedRange,
            SourceKind::PlatsbankenHistorical => DateParamStyle::HistoricalRange,
            _ => DateParamStyle::None,
        }
    }

    fn offset_param(self) -> Option<&'static str> {
        match self {
            SourceKind::Platsbanken | SourceKind::PlatsbankenHistorical => Some("offset"),
            SourceKind::Indeed => Some("start"),
            SourceKind::JobPostingFeed => Some("offset"),
            SourceKind::Custom => None,
        }
    }

    fn limit_param(self) -> Option<&'static str> {
        match self {
            SourceKind::Platsbanken | SourceKind::PlatsbankenHistorical => Some("limit"),
            SourceKind::JobPostingFeed => Some("limit"),
            _ => None,
        }
    }

    /// Param carrying the keyword query, and the location param if the source
    /// has a dedicated one (`None` means location goes into the query).
    fn query_params(self) -> (&'static str, Option<&'static str>) {
        match self {
            SourceKind::Platsbanken | SourceKind::PlatsbankenHistorical => ("q", None),
            SourceKind::Indeed => ("query", Some("location")),
            SourceKind::JobPostingFeed => ("search", Some("location_filter")),
            SourceKind::Custom => ("q", None),
        }
    }
}

/// Append `location` to a free-text query unless it already occurs there as
/// whole words (case-insensitive).
/// Applying it twice gives the same result as applying it once.
pub fn apply_location(query: &str, location: &str) -> String {
    let query = query.trim();
    let location = location.trim();
    if location.is_empty() {
        return query.to_string();
    }
    let lowered_query = query.to_lowercase();
    let lowered_location = location.to_lowercase();
    let words: Vec<&str> = lowered_query.split_whitespace().collect();
    let needle: Vec<&str> = lowered_location.split_whitespace().collect();
    // Whole-word, case-insensitive; multi-word locations must appear contiguously.
    let already = words.windows(needle.len()).any(|w| w == needle.as_slice());
    if already {
        query.to_string()
    } else if query.is_empty() {
        location.to_string()
    } else {
        format!("{query} {location}")
    }
}

/// Keyword query for this run: the configured query, or `n` distinct terms
/// sampled from `ROLE_VOCABULARY`.
pub fn base_query<R: Rng + ?Sized>(cfg: &IngestConfig, rng: &mut R) -> String {
    if cfg.sample_terms == 0 {
        return cfg.query.trim().to_string();
    }
    let n = cfg.sample_terms.min(ROLE_VOCABULARY.len());
    ROLE_VOCABULARY
        .choose_multiple(rng, n)
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct SourceRegistry;

impl SourceRegistry {
    /// Enabled sources ordered by priority (ties broken by name).
    pub fn build<R: Rng + ?Sized>(cfg: &IngestConfig, rng: &mut R) -> Vec<SourceConfig> {
        for name in cfg.sources.keys() {
            if SourceKind::from_name(name).is_none() {
                tracing::debug!(source = %name, "ignoring unknown source in enable map");
            }
        }

        let query = base_query(cfg, rng);
        let mut out = Vec::new();

        for kind in SourceKind::KNOWN {
            let name = kind.default_name();
            let enabled = cfg
                .sources
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| *v)
                .unwrap_or(false);
            if !enabled || !allowed(cfg, name) {
                continue;
            }
            let mut headers = BTreeMap::new();
            if let Some(host) = kind.rapidapi_host() {
                let Some(key) = cfg.api_key.as_deref() else {
                    tracing::warn!(source = name, "RAPID_API_KEY not set; skipping source");
                    continue;
                };
                headers.insert(RAPIDAPI_KEY_HEADER.to_string(), key.to_string());
                headers.insert(RAPIDAPI_HOST_HEADER.to_string(), host.to_string());
            }
            out.push(SourceConfig {
                name: name.to_string(),
                kind,
                enabled: true,
                priority: kind.default_priority(),
                url_template: kind.base_url().to_string(),
                headers,
                static_params: static_params(kind, &query, &cfg.location, cfg.page_size),
            });
        }

        for (i, url) in cfg.extra_apis.iter().enumerate() {
            let name = format!("custom_{}", i + 1);
            if !allowed(cfg, &name) && !allowed(cfg, "custom") {
                continue;
            }
            out.push(SourceConfig {
                name,
                kind: SourceKind::Custom,
                enabled: true,
                priority: SourceKind::Custom.default_priority() + i as i32,
                url_template: url.clone(),
                headers: BTreeMap::new(),
                static_params: BTreeMap::new(),
            });
        }

        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        tracing::info!(
            sources = ?out.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            query = %query,
            "source registry built"
        );
        out
    }
}

fn allowed(cfg: &IngestConfig, name: &str) -> bool {
    cfg.allow_list.is_empty() || cfg.allow_list.iter().any(|a| a.eq_ignore_ascii_case(name))
}

fn static_params(
    kind: SourceKind,
    query: &str,
    location: &str,
    page_size: u32,
) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let (query_param, location_param) = kind.query_params();
    match location_param {
        Some(lp) => {
            params.insert(query_param.to_string(), query.to_string());
            if !location.is_empty() {
                params.insert(lp.to_string(), location.to_string());
            }
        }
        None => {
            params.insert(query_param.to_string(), apply_location(query, location));
        }
    }
    if let Some(lp) = kind.limit_param() {
        params.insert(lp.to_string(), page_size.to_string());
    }
    if kind == SourceKind::JobPostingFeed {
        params.insert("title_search".to_string(), "false".to_string());
        params.insert("description_type".to_string(), "text".to_string());
    }
    params
}

fn format_param_date(ts: NaiveDateTime) -> String {
    ts.format(DATE_PARAM_FORMAT).to_string()
}

impl SourceConfig {
    /// Resolve this source into a concrete request for one segment and page.
    pub fn build_request(&self, segment: &TimeSegment, offset: u32) -> FetchRequest {
        let mut params = self.static_params.clone();
        match self.kind.date_style() {
            DateParamStyle::PublishedRange => {
                params.insert("published-after".into(), format_param_date(segment.start));
                params.insert("published-before".into(), format_param_date(segment.end));
            }
            DateParamStyle::HistoricalRange => {
                params.insert("historical-from".into(), format_param_date(segment.start));
                params.insert("historical-to".into(), format_param_date(segment.end));
            }
            DateParamStyle::None => {}
        }
        if let Some(op) = self.kind.offset_param() {
            params.insert(op.to_string(), offset.to_string());
        }
        FetchRequest {
            source_name: self.name.clone(),
            url: self.url_template.clone(),
            headers: self.headers.clone(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn apply_location_is_idempotent() {
        let once = apply_location("utvecklare", "Göteborg");
        assert_eq!(once, "utvecklare Göteborg");
        assert_eq!(apply_location(&once, "Göteborg"), once);
        assert_eq!(apply_location(&once, "göteborg"), once);
        assert_eq!(apply_location("utvecklare", ""), "utvecklare");
        assert_eq!(apply_location("", "Malmö"), "Malmö");
        // "Lund" must not be treated as present inside "Kalund".
        assert_eq!(apply_location("dev Kalund", "Lund"), "dev Kalund Lund");
    }

    #[test]
    fn location_anywhere_in_query_is_not_repeated() {
        assert_eq!(
            apply_location("Göteborg utvecklare", "göteborg"),
            "Göteborg utvecklare"
        );
        assert_eq!(
            apply_location("utvecklare  Stockholms   län remote", "Stockholms län"),
            "utvecklare  Stockholms   län remote"
        );
        assert_eq!(
            apply_location("län Stockholms", "Stockholms län"),
            "län Stockholms Stockholms län"
        );
    }

    #[test]
    fn keyless_rapidapi_sources_are_skipped() {
        let cfg = IngestConfig::default();
        let sources = SourceRegistry::build(&cfg, &mut rng());
        let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["platsbanken"]);
    }

    #[test]
    fn ordered_by_priority_and_filtered_by_allow_list() {
        let mut cfg = IngestConfig {
            api_key: Some("k".into()),
            extra_apis: vec!["https://example.test/jobs".into()],
            ..Default::default()
        };
        cfg.sources.insert("nonexistent".into(), true);
        let names: Vec<_> = SourceRegistry::build(&cfg, &mut rng())
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec!["platsbanken", "indeed", "job_posting_feed", "custom_1"]
        );

        cfg.allow_list = vec!["indeed".into()];
        let only = SourceRegistry::build(&cfg, &mut rng());
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].headers.get("x-rapidapi-host").unwrap(), "indeed12.p.rapidapi.com");
    }

    #[test]
    fn location_goes_to_query_or_dedicated_param() {
        let cfg = IngestConfig {
            api_key: Some("k".into()),
            location: "Uppsala".into(),
            ..Default::default()
        };
        let sources = SourceRegistry::build(&cfg, &mut rng());
        let pb = sources.iter().find(|s| s.name == "platsbanken").unwrap();
        assert_eq!(pb.static_params["q"], "utvecklare Uppsala");
        assert_eq!(pb.static_params["limit"], "20");
        let indeed = sources.iter().find(|s| s.name == "indeed").unwrap();
        assert_eq!(indeed.static_params["location"], "Uppsala");
        let feed = sources.iter().find(|s| s.name == "job_posting_feed").unwrap();
        assert_eq!(feed.static_params["location_filter"], "Uppsala");
    }

    #[test]
    fn sampled_query_uses_vocabulary_terms() {
        let one = IngestConfig {
            sample_terms: 1,
            ..Default::default()
        };
        let q = base_query(&one, &mut rng());
        assert!(ROLE_VOCABULARY.contains(&q.as_str()));
        assert_eq!(q, base_query(&one, &mut rng()));

        let all = IngestConfig {
            sample_terms: 99,
            ..Default::default()
        };
        let q = base_query(&all, &mut rng());
        assert!(ROLE_VOCABULARY.iter().all(|t| q.contains(t)));
    }

    #[test]
    fn request_carries_segment_dates_and_offset() {
        let mut cfg = IngestConfig::default();
        cfg.sources.insert("platsbanken_historical".into(), true);
        let sources = SourceRegistry::build(&cfg, &mut rng());
        let seg = TimeSegment {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 6).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        };

        let live = sources[0].build_request(&seg, 40);
        assert_eq!(live.params["published-after"], "2024-01-01T00:00:00");
        assert_eq!(live.params["published-before"], "2024-01-06T00:00:00");
        assert_eq!(live.params["offset"], "40");

        let hist = sources[1].build_request(&seg, 0);
        assert_eq!(hist.source_name, "platsbanken_historical");
        assert_eq!(hist.params["historical-from"], "2024-01-01T00:00:00");
        assert!(!hist.params.contains_key("published-after"));
    }
}
