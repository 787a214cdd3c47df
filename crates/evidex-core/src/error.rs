//! Error taxonomy shared by every stage of the indexing pipeline.
//!
//! Loading, chunking, and index construction fail fast on any of these.
//! Retrieval never returns an error for "no results"; an empty list is a
//! normal outcome that callers record as a degradation.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// File extension has no registered loader.
    #[error("unsupported document format '{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// Loading and chunking produced zero chunks.
    #[error("no chunks were produced from the given documents; refusing to build an empty index")]
    CorpusEmpty,

    /// Embedding output is not a dense 2-D matrix with one row per chunk.
    #[error("embedding output has wrong shape: expected {expected_rows} rows, got {rows} ({detail})")]
    EmbeddingShape {
        expected_rows: usize,
        rows: usize,
        detail: String,
    },

    /// Cache directory or one of its artifacts is absent.
    #[error("index not found at {}: missing {missing}", path.display())]
    IndexNotFound { path: PathBuf, missing: String },

    /// Persisted artifacts disagree with each other or are malformed.
    #[error("index is corrupt: {0}")]
    IndexCorrupt(String),

    /// Fusion weight outside `[0, 1]`.
    #[error("fusion weight alpha must lie in [0, 1], got {0}")]
    InvalidWeight(f64),

    /// A PDF or OOXML container could not be parsed.
    #[error("failed to extract text from {}: {message}", path.display())]
    Extract { path: PathBuf, message: String },

    /// The embedding collaborator failed.
    #[error("embedding provider failed: {0}")]
    Embedding(String),

    /// The embedding collaborator did not answer in time.
    #[error("embedding call exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
