// src/ingest/providers/jobtech.rs
//! JobTech (Platsbanken) search API, live and historical. Both return
//! `{ "total": {...}, "hits": [ad, ...] }` with the same ad schema.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::{clean_text, compose_description, id_from_value, missing_id, parse_timestamp, put, schema_mismatch};
use crate::error::IngestError;
use crate::ingest::types::ListingRecord;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Ad {
    id: Option<Value>,
    headline: Option<String>,
    publication_date: Option<String>,
    webpage_url: Option<String>,
    employer: Option<Employer>,
    workplace_address: Option<Address>,
    description: Option<Description>,
    occupation: Option<Label>,
    employment_type: Option<Label>,
    application_details: Option<Application>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Employer {
    name: Option<String>,
    workplace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Address {
    municipality: Option<String>,
    region: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Description {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Label {
    label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Application {
    email: Option<String>,
    url: Option<String>,
}

/// Top-level shape errors fail the whole response; per-ad problems only that ad.
pub fn extract(
    source_name: &str,
    value: Value,
) -> Result<Vec<Result<ListingRecord, IngestError>>, IngestError> {
    let resp: SearchResponse =
        serde_json::from_value(value).map_err(|e| schema_mismatch(source_name, e))?;
    Ok(resp
        .hits
        .into_iter()
        .map(|hit| extract_ad(source_name, hit))
        .collect())
}

fn extract_ad(source_name: &str, hit: Value) -> Result<ListingRecord, IngestError> {
    let ad: Ad = serde_json::from_value(hit).map_err(|e| schema_mismatch(source_name, e))?;
    let external_id = id_from_value(ad.id.as_ref()).ok_or_else(|| missing_id(source_name))?;

    let title = ad.headline.unwrap_or_default().trim().to_string();
    let employer = ad.employer.unwrap_or_default();
    let company = employer
        .name
        .or(employer.workplace)
        .unwrap_or_default()
        .trim()
        .to_string();
    let address = ad.workplace_address.unwrap_or_default();
    let location = [address.municipality.as_deref(), address.region.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    let text = ad
        .description
        .and_then(|d| d.text)
        .map(|t| clean_text(&t))
        .unwrap_or_default();

    let mut metadata = BTreeMap::new();
    put(&mut metadata, "Company", Some(&company));
    put(&mut metadata, "Location", Some(&location));
    put(&mut metadata, "Country", address.country.as_deref());
    put(&mut metadata, "Occupation", ad.occupation.and_then(|o| o.label).as_deref());
    put(&mut metadata, "EmploymentType", ad.employment_type.and_then(|o| o.label).as_deref());
    let application = ad.application_details.unwrap_or_default();
    put(&mut metadata, "Contact", application.email.as_deref());
    put(
        &mut metadata,
        "Url",
        application.url.as_deref().or(ad.webpage_url.as_deref()),
    );

    Ok(ListingRecord {
        external_id,
        source: source_name.to_string(),
        published_at: ad.publication_date.as_deref().and_then(parse_timestamp),
        description: compose_description(&title, &company, &text),
        title,
        company,
        location,
        metadata,
    })
}
