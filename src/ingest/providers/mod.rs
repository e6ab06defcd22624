// src/ingest/providers/mod.rs
//! Response normalization. Each submodule knows one upstream schema and maps
//! it to `ListingRecord`s.

pub mod indeed;
pub mod job_posting_feed;
pub mod jobtech;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use metrics::counter;
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::IngestError;
use crate::ingest::types::{ListingRecord, RawResponse, SourceConfig, SourceKind};

/// Map one response to canonical records. Never fails: bad responses and bad
/// listings are logged and skipped.
pub fn normalize(source: &SourceConfig, raw: &RawResponse) -> Vec<ListingRecord> {
    // Already logged by the executor.
    let Ok(body) = raw.success_body() else {
        return Vec::new();
    };

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            let err = IngestError::MalformedResponse {
                source_name: source.name.clone(),
                message: e.to_string(),
            };
            tracing::warn!(source = %source.name, error = %err, "skipping response");
            counter!("ingest_malformed_responses_total").increment(1);
            return Vec::new();
        }
    };

    let parsed = match source.kind {
        SourceKind::Platsbanken | SourceKind::PlatsbankenHistorical => {
            jobtech::extract(&source.name, value)
        }
        SourceKind::Indeed => indeed::extract(&source.name, value),
        SourceKind::JobPostingFeed => job_posting_feed::extract(&source.name, value),
        SourceKind::Custom => {
            tracing::info!(source = %source.name, "no extractor for custom source; ignoring response");
            return Vec::new();
        }
    };

    match parsed {
        Ok(items) => collect_listings(&source.name, items),
        Err(e) => {
            tracing::warn!(source = %source.name, error = %e, "skipping response");
            Vec::new()
        }
    }
}

/// Keep the listings that parsed; log and drop the rest.
fn collect_listings(
    source_name: &str,
    items: Vec<Result<ListingRecord, IngestError>>,
) -> Vec<ListingRecord> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Ok(rec) => out.push(rec),
            Err(e) => {
                counter!("ingest_listings_skipped_total", "reason" => skip_reason(&e)).increment(1);
                tracing::debug!(source = source_name, error = %e, "skipping listing");
            }
        }
    }
    out
}

fn skip_reason(e: &IngestError) -> &'static str {
    match e {
        IngestError::MissingIdentifier { .. } => "missing_id",
        IngestError::SchemaMismatch { .. } => "schema",
        _ => "other",
    }
}

/// Ids arrive as strings or numbers depending on the API.
pub(crate) fn id_from_value(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn missing_id(source_name: &str) -> IngestError {
    IngestError::MissingIdentifier {
        source_name: source_name.to_string(),
    }
}

pub(crate) fn schema_mismatch(source_name: &str, e: impl ToString) -> IngestError {
    IngestError::SchemaMismatch {
        source_name: source_name.to_string(),
        message: e.to_string(),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.f]`, `YYYY-MM-DD HH:MM:SS` and
/// bare `YYYY-MM-DD`. Offsets are converted to UTC.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn timestamp_from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Decode entities, strip tags, collapse whitespace inside lines and squeeze
/// blank-line runs to a single paragraph break.
pub fn clean_text(s: &str) -> String {
    static RE_BREAKS: OnceCell<regex::Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_breaks = RE_BREAKS
        .get_or_init(|| regex::Regex::new(r"(?i)<br\s*/?>|</p>|</li>|</h\d>").expect("valid regex"));
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("valid regex"));
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[ \t\u{00A0}]+").expect("valid regex"));

    let out = re_breaks.replace_all(s, "\n");
    let out = re_tags.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out).replace('\r', "");

    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = false;
    for line in out.lines() {
        let line = re_ws.replace_all(line, " ").trim().to_string();
        if line.is_empty() {
            if !lines.is_empty() {
                blank_run = true;
            }
            continue;
        }
        if blank_run {
            lines.push(String::new());
            blank_run = false;
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Readable body: title, company line, then the description text.
pub fn compose_description(title: &str, company: &str, text: &str) -> String {
    let mut out = String::new();
    if !title.is_empty() {
        out.push_str(title);
        out.push('\n');
    }
    if !company.is_empty() {
        out.push_str(company);
        out.push('\n');
    }
    if !text.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(text);
    }
    out.trim_end().to_string()
}

/// Insert `value` under `key` if it has any content.
pub(crate) fn put(meta: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        meta.insert(key.to_string(), v.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(kind: SourceKind) -> SourceConfig {
        SourceConfig {
            name: kind.default_name().into(),
            kind,
            enabled: true,
            priority: 0,
            url_template: String::new(),
            headers: Default::default(),
            static_params: Default::default(),
        }
    }

    #[test]
    fn timestamps_in_all_supported_shapes() {
        let want = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        for s in [
            "2024-02-01T10:00:00",
            "2024-02-01T10:00:00.123",
            "2024-02-01T10:00:00Z",
            "2024-02-01T11:00:00+01:00",
            "2024-02-01 10:00:00",
            "2024-02-01",
        ] {
            assert_eq!(parse_timestamp(s).map(|t| t.date()), Some(want), "{s}");
        }
        assert_eq!(parse_timestamp("last tuesday"), None);
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(
            timestamp_from_millis(1_706_745_600_000).map(|t| t.date()),
            Some(want)
        );
    }

    #[test]
    fn clean_text_strips_html_and_keeps_paragraphs() {
        let html = "<p>Vi söker en&nbsp;<b>utvecklare</b>.</p>\n\n\n<p>Krav:<br>Rust &amp; SQL</p>";
        assert_eq!(clean_text(html), "Vi söker en utvecklare.\n\nKrav:\nRust & SQL");
        assert_eq!(clean_text("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn compose_skips_empty_parts() {
        assert_eq!(compose_description("Dev", "Acme", "Text"), "Dev\nAcme\n\nText");
        assert_eq!(compose_description("Dev", "", ""), "Dev");
        assert_eq!(compose_description("", "", "Only text"), "Only text");
    }

    #[test]
    fn failures_yield_no_records() {
        let pb = source(SourceKind::Platsbanken);
        assert!(normalize(&pb, &RawResponse::ok("platsbanken", 500, "oops")).is_empty());
        assert!(normalize(&pb, &RawResponse::ok("platsbanken", 200, "{not json")).is_empty());
        assert!(normalize(&pb, &RawResponse::ok("platsbanken", 200, "[1,2]")).is_empty());
        let custom = source(SourceKind::Custom);
        assert!(normalize(&custom, &RawResponse::ok("custom", 200, r#"{"hits":[{"id":1}]}"#)).is_empty());
    }
}
