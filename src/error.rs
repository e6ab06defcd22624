// src/error.rs
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Everything that can go wrong between an upstream API and the listing store.
///
/// Only `Persistence` and `Config` abort a run; the other variants are logged
/// and skip the unit of work they belong to (one response or one listing).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("network error for {source_name}: {message}")]
    Network {
        source_name: String,
        message: String,
    },

    #[error("upstream {source_name} returned HTTP {status}: {body}")]
    Upstream {
        source_name: String,
        status: u16,
        body: String,
    },

    #[error("malformed JSON from {source_name}: {message}")]
    MalformedResponse {
        source_name: String,
        message: String,
    },

    #[error("unexpected response shape from {source_name}: {message}")]
    SchemaMismatch {
        source_name: String,
        message: String,
    },

    #[error("listing from {source_name} has no external id")]
    MissingIdentifier { source_name: String },

    #[error("failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("listing index at {} is unreadable: {message}", path.display())]
    IndexCorruption { path: PathBuf, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// True for errors that must stop the current run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence { .. } | Self::Config(_))
    }
}
