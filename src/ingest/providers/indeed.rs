// src/ingest/providers/indeed.rs
//! Indeed search via RapidAPI (`indeed12`). Search hits carry no full text,
//! only a short snippet when present.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::{
    clean_text, compose_description, id_from_value, missing_id, parse_timestamp, put,
    schema_mismatch, timestamp_from_millis,
};
use crate::error::IngestError;
use crate::ingest::types::ListingRecord;

const INDEED_BASE: &str = "https://www.indeed.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Hit {
    id: Option<Value>,
    title: Option<String>,
    company_name: Option<String>,
    location: Option<String>,
    link: Option<String>,
    pub_date_ts_milli: Option<i64>,
    date: Option<String>,
    formatted_relative_time: Option<String>,
    snippet: Option<String>,
    description: Option<String>,
    salary: Option<Salary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Salary {
    min: Option<f64>,
    max: Option<f64>,
    #[serde(rename = "type")]
    period: Option<String>,
}

impl Salary {
    fn display(&self) -> Option<String> {
        let range = match (self.min, self.max) {
            (Some(lo), Some(hi)) if lo != hi => format!("{lo:.0}-{hi:.0}"),
            (Some(v), _) | (None, Some(v)) => format!("{v:.0}"),
            (None, None) => return None,
        };
        Some(match self.period.as_deref() {
            Some(p) if !p.is_empty() => format!("{range} ({p})"),
            _ => range,
        })
    }
}

pub fn extract(
    source_name: &str,
    value: Value,
) -> Result<Vec<Result<ListingRecord, IngestError>>, IngestError> {
    let resp: SearchResponse =
        serde_json::from_value(value).map_err(|e| schema_mismatch(source_name, e))?;
    Ok(resp
        .hits
        .into_iter()
        .map(|hit| extract_hit(source_name, hit))
        .collect())
}

fn extract_hit(source_name: &str, hit: Value) -> Result<ListingRecord, IngestError> {
    let hit: Hit = serde_json::from_value(hit).map_err(|e| schema_mismatch(source_name, e))?;
    let external_id = id_from_value(hit.id.as_ref()).ok_or_else(|| missing_id(source_name))?;

    let title = hit.title.unwrap_or_default().trim().to_string();
    let company = hit.company_name.unwrap_or_default().trim().to_string();
    let location = hit.location.unwrap_or_default().trim().to_string();
    let text = hit
        .description
        .or(hit.snippet)
        .map(|t| clean_text(&t))
        .unwrap_or_default();
    let published_at = hit
        .pub_date_ts_milli
        .and_then(timestamp_from_millis)
        .or_else(|| hit.date.as_deref().and_then(parse_timestamp));

    let url = hit.link.map(|l| {
        if l.starts_with('/') {
            format!("{INDEED_BASE}{l}")
        } else {
            l
        }
    });

    let mut metadata = BTreeMap::new();
    put(&mut metadata, "Company", Some(&company));
    put(&mut metadata, "Location", Some(&location));
    put(&mut metadata, "Salary", hit.salary.and_then(|s| s.display()).as_deref());
    put(&mut metadata, "Posted", hit.formatted_relative_time.as_deref());
    put(&mut metadata, "Url", url.as_deref());

    Ok(ListingRecord {
        external_id,
        source: source_name.to_string(),
        published_at,
        description: compose_description(&title, &company, &text),
        title,
        company,
        location,
        metadata,
    })
}
