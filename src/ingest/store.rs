// src/ingest/store.rs
//! Listing files on disk plus the JSON index that gates uniqueness.
//!
//! The index maps `"{source}_{external_id}"` to the stored file. It is loaded
//! once, pruned of entries whose file disappeared, mutated in memory by a
//! single writer, and flushed with a tmp-file + rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::ingest::types::{dedup_key, ListingRecord};

pub const SEPARATOR_WIDTH: usize = 50;
const UNKNOWN_DATE_HEADER: &str = "unknown";

/// What to do with listings whose publication date could not be parsed.
///
/// Defaults to `Keep`: such listings are stored under the `unknown_date`
/// bucket so they are still deduplicated on the next run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownDatePolicy {
    #[default]
    Keep,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub file_path: PathBuf,
    /// Date bucket, `YYYYMMDD` or `unknown_date`.
    #[serde(rename = "date")]
    pub date_bucket: String,
    pub source: String,
    pub id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct DeduplicationIndex {
    path: PathBuf,
    entries: BTreeMap<String, IndexEntry>,
}

impl DeduplicationIndex {
    /// Load from `path`. A missing file is an empty index; an unreadable one
    /// is moved aside to `<path>.corrupt` and replaced by an empty index.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(IngestError::IndexCorruption { message, .. }) => {
                let aside = path.with_extension("json.corrupt");
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %message,
                    "listing index unreadable; starting from an empty index"
                );
                if let Err(e) = fs::rename(&path, &aside) {
                    tracing::warn!(error = %e, "could not move corrupt index aside");
                }
                BTreeMap::new()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "listing index not loaded");
                BTreeMap::new()
            }
        };

        let before = entries.len();
        let entries: BTreeMap<_, _> = entries
            .into_iter()
            .filter(|(_, e)| e.file_path.exists())
            .collect();
        if entries.len() != before {
            tracing::info!(
                pruned = before - entries.len(),
                "dropped index entries whose listing file is gone"
            );
        }
        gauge!("ingest_index_entries").set(entries.len() as f64);
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, source: &str, external_id: &str) -> bool {
        self.entries.contains_key(&dedup_key(source, external_id))
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Returns false (and leaves the index untouched) if the key exists.
    pub fn insert(&mut self, entry: IndexEntry) -> bool {
        let key = dedup_key(&entry.source, &entry.id);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &BTreeMap<String, IndexEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the whole index back to disk.
    pub fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| IngestError::persistence(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| IngestError::persistence(&self.path, io::Error::other(e)))?;
        write_atomic(&self.path, &json)?;
        gauge!("ingest_index_entries").set(self.entries.len() as f64);
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, IndexEntry>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(IngestError::IndexCorruption {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&content).map_err(|e| IngestError::IndexCorruption {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut f = fs::File::create(&tmp).map_err(|e| IngestError::persistence(&tmp, e))?;
    f.write_all(bytes)
        .and_then(|_| f.sync_all())
        .map_err(|e| IngestError::persistence(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| IngestError::persistence(path, e))?;
    Ok(())
}

/// Outcome of `ListingStore::persist` for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Stored(PathBuf),
    Duplicate,
    SkippedUndated,
}

/// Owns the listing directory and the index that points into it.
#[derive(Debug)]
pub struct ListingStore {
    dir: PathBuf,
    index: DeduplicationIndex,
    unknown_dates: UnknownDatePolicy,
}

impl ListingStore {
    pub fn open(
        dir: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
        unknown_dates: UnknownDatePolicy,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| IngestError::persistence(&dir, e))?;
        let index = DeduplicationIndex::load(index_path);
        tracing::info!(
            dir = %dir.display(),
            entries = index.len(),
            "listing store opened"
        );
        Ok(Self {
            dir,
            index,
            unknown_dates,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &DeduplicationIndex {
        &self.index
    }

    pub(crate) fn index_mut(&mut self) -> &mut DeduplicationIndex {
        &mut self.index
    }

    pub fn is_duplicate(&self, source: &str, external_id: &str) -> bool {
        self.index.contains(source, external_id)
    }

    /// Store a record unless it is already known. File or index write
    /// failures are returned and must end the run.
    pub fn persist(&mut self, record: &ListingRecord) -> Result<PersistOutcome> {
        if self.is_duplicate(&record.source, &record.external_id) {
            counter!("ingest_listings_duplicate_total", "source" => record.source.clone())
                .increment(1);
            return Ok(PersistOutcome::Duplicate);
        }
        if record.published_at.is_none() && self.unknown_dates == UnknownDatePolicy::Drop {
            counter!("ingest_listings_skipped_total", "reason" => "undated").increment(1);
            tracing::debug!(
                source = %record.source,
                id = %record.external_id,
                "dropping listing without a publication date"
            );
            return Ok(PersistOutcome::SkippedUndated);
        }

        let date_bucket = record.date_bucket();
        let file_name = format!(
            "{}_{}_{}.txt",
            record.source,
            date_bucket,
            file_safe(&record.external_id)
        );
        let path = self.dir.join(file_name);
        write_atomic(&path, render_listing(record).as_bytes())?;

        self.index.insert(IndexEntry {
            file_path: path.clone(),
            date_bucket,
            source: record.source.clone(),
            id: record.external_id.clone(),
            metadata: record.metadata.clone(),
        });
        counter!("ingest_listings_stored_total", "source" => record.source.clone()).increment(1);
        Ok(PersistOutcome::Stored(path))
    }

    pub fn flush(&self) -> Result<()> {
        self.index.flush()
    }
}

/// Keep ids usable as file name components. Bytes outside `[A-Za-z0-9_.-]`
/// become `~xx` (lowercase hex, `~` included), so distinct ids never share
/// a file name.
fn file_safe(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.') {
            out.push(b as char);
        } else {
            out.push_str(&format!("~{b:02x}"));
        }
    }
    out
}

/// Header lines, a 50-dash separator, a blank line, then the body.
pub fn render_listing(record: &ListingRecord) -> String {
    let date = record
        .published_at
        .map(|ts| ts.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| UNKNOWN_DATE_HEADER.to_string());
    let mut out = format!(
        "Source: {}\nDate: {}\nID: {}\n",
        record.source, date, record.external_id
    );
    for (k, v) in &record.metadata {
        // Header values are single-line.
        out.push_str(&format!("{k}: {}\n", v.replace(['\r', '\n'], " ")));
    }
    out.push_str(&"-".repeat(SEPARATOR_WIDTH));
    out.push_str("\n\n");
    out.push_str(&record.description);
    out.push('\n');
    out
}

/// The body part of a rendered listing (everything after the separator).
pub fn listing_body(content: &str) -> &str {
    let sep = "-".repeat(SEPARATOR_WIDTH);
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end_matches(['\r', '\n']) == sep {
            let rest = &content[offset..];
            let rest = rest.strip_prefix('\n').unwrap_or(rest);
            return rest.strip_suffix('\n').unwrap_or(rest);
        }
    }
    content
}
