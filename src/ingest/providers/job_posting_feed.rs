// src/ingest/providers/job_posting_feed.rs
//! Active ATS job posting feed via RapidAPI. Depending on endpoint version the
//! listings come as a bare array or wrapped in `hits`/`jobs`/`data`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::{
    clean_text, compose_description, id_from_value, missing_id, parse_timestamp, put,
    schema_mismatch,
};
use crate::error::IngestError;
use crate::ingest::types::ListingRecord;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedAny {
    Bare(Vec<Value>),
    Hits { hits: Vec<Value> },
    Jobs { jobs: Vec<Value> },
    Data { data: Vec<Value> },
}

impl FeedAny {
    fn into_items(self) -> Vec<Value> {
        match self {
            FeedAny::Bare(v) => v,
            FeedAny::Hits { hits } => hits,
            FeedAny::Jobs { jobs } => jobs,
            FeedAny::Data { data } => data,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Posting {
    id: Option<Value>,
    title: Option<String>,
    organization: Option<String>,
    date_posted: Option<String>,
    date_created: Option<String>,
    locations_derived: Option<Vec<String>>,
    description_text: Option<String>,
    description_html: Option<String>,
    url: Option<String>,
    employment_type: Option<Vec<String>>,
    organization_url: Option<String>,
}

pub fn extract(
    source_name: &str,
    value: Value,
) -> Result<Vec<Result<ListingRecord, IngestError>>, IngestError> {
    let feed: FeedAny = serde_json::from_value(value).map_err(|e| schema_mismatch(source_name, e))?;
    Ok(feed
        .into_items()
        .into_iter()
        .map(|item| extract_posting(source_name, item))
        .collect())
}

fn extract_posting(source_name: &str, item: Value) -> Result<ListingRecord, IngestError> {
    let p: Posting = serde_json::from_value(item).map_err(|e| schema_mismatch(source_name, e))?;
    let external_id = id_from_value(p.id.as_ref()).ok_or_else(|| missing_id(source_name))?;

    let title = p.title.unwrap_or_default().trim().to_string();
    let company = p.organization.unwrap_or_default().trim().to_string();
    let location = p
        .locations_derived
        .unwrap_or_default()
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    let text = p
        .description_text
        .or(p.description_html)
        .map(|t| clean_text(&t))
        .unwrap_or_default();
    let published_at = p
        .date_posted
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| p.date_created.as_deref().and_then(parse_timestamp));
    let employment = p.employment_type.map(|v| v.join(", "));

    let mut metadata = BTreeMap::new();
    put(&mut metadata, "Company", Some(&company));
    put(&mut metadata, "Location", Some(&location));
    put(&mut metadata, "EmploymentType", employment.as_deref());
    put(&mut metadata, "CompanyUrl", p.organization_url.as_deref());
    put(&mut metadata, "Url", p.url.as_deref());

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
