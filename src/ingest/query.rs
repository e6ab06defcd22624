// src/ingest/query.rs
//! Read and maintenance operations over the stored listings. No network I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::ingest::store::{listing_body, IndexEntry, ListingStore};
use crate::ingest::types::{dedup_key, UNKNOWN_DATE_BUCKET};

/// Metadata key searched by the location filter.
const LOCATION_KEY: &str = "Location";
const DATE_BUCKET_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingFilter {
    /// Exact source names to keep; `None` keeps every source.
    pub sources: Option<BTreeSet<String>>,
    /// First publication day, inclusive.
    pub date_from: Option<NaiveDate>,
    /// Last publication day, inclusive.
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive substring of the `Location` metadata.
    pub location: Option<String>,
}

impl ListingFilter {
    pub fn sources<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: Some(names.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(sources) = &self.sources {
            if !sources.contains(&entry.source) {
                return false;
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            // Undated entries have no place in a date range.
            if entry.date_bucket == UNKNOWN_DATE_BUCKET {
                return false;
            }
            let Ok(day) = NaiveDate::parse_from_str(&entry.date_bucket, DATE_BUCKET_FORMAT) else {
                return false;
            };
            if self.date_from.is_some_and(|from| day < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| day > to) {
                return false;
            }
        }
        if let Some(loc) = self.location.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            let needle = loc.to_lowercase();
            let hit = entry
                .metadata
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(LOCATION_KEY))
                .is_some_and(|(_, v)| v.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// How a caller names a stored listing.
#[derive(Debug, Clone, Copy)]
pub enum ListingRef<'a> {
    Path(&'a Path),
    Key { source: &'a str, external_id: &'a str },
}

impl ListingStore {
    /// Index entries matching `filter`; `None` returns the whole index.
    pub fn get_saved_listings(&self, filter: Option<&ListingFilter>) -> BTreeMap<String, IndexEntry> {
        let entries = self.index().entries();
        match filter {
            None => entries.clone(),
            Some(f) => entries
                .iter()
                .filter(|(_, e)| f.matches(e))
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect(),
        }
    }

    /// Body of a stored listing, or `None` if it is not in the store.
    pub fn get_listing_content(&self, listing: ListingRef<'_>) -> Result<Option<String>> {
        let path = match listing {
            ListingRef::Path(p) => p.to_path_buf(),
            ListingRef::Key {
                source,
                external_id,
            } => match self.index().get(&dedup_key(source, external_id)) {
                Some(entry) => entry.file_path.clone(),
                None => return Ok(None),
            },
        };
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(listing_body(&content).to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IngestError::persistence(path, e)),
        }
    }

    /// Delete matching listing files and their index entries; returns the
    /// number of files removed. Without a filter every `.txt` file in the
    /// store directory goes and the index is emptied.
    pub fn clear_listings(&mut self, filter: Option<&ListingFilter>) -> Result<usize> {
        let removed = match filter {
            None => {
                let mut removed = 0;
                let dir = self.dir().to_path_buf();
                for entry in fs::read_dir(&dir).map_err(|e| IngestError::persistence(&dir, e))? {
                    let path = entry.map_err(|e| IngestError::persistence(&dir, e))?.path();
                    if path.is_file() && path.extension().is_some_and(|x| x == "txt") {
                        fs::remove_file(&path).map_err(|e| IngestError::persistence(&path, e))?;
                        removed += 1;
                    }
                }
                self.index_mut().clear();
                removed
            }
            Some(f) => {
                let keys: Vec<String> = self.get_saved_listings(Some(f)).into_keys().collect();
                let mut removed = 0;
                for key in keys {
                    let Some(entry) = self.index_mut().remove(&key) else {
                        continue;
                    };
                    match fs::remove_file(&entry.file_path) {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(IngestError::persistence(entry.file_path, e)),
                    }
                }
                removed
            }
        };
        self.flush()?;
        tracing::info!(removed, remaining = self.index().len(), "listings cleared");
        Ok(removed)
    }

    /// Copy matching listing files into `dest`; returns the number copied.
    pub fn export_listings(&self, dest: &Path, filter: Option<&ListingFilter>) -> Result<usize> {
        fs::create_dir_all(dest).map_err(|e| IngestError::persistence(dest, e))?;
        let mut copied = 0;
        for entry in self.get_saved_listings(filter).values() {
            let Some(name) = entry.file_path.file_name() else {
                continue;
            };
            let target = dest.join(name);
            match fs::copy(&entry.file_path, &target) {
                Ok(_) => copied += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(file = %entry.file_path.display(), "listing file missing; not exported");
                }
                Err(e) => return Err(IngestError::persistence(target, e)),
            }
        }
        tracing::info!(copied, dest = %dest.display(), "listings exported");
        Ok(copied)
    }
}
