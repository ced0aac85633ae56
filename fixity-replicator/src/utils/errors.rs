//! Error types for the fixity replicator.

use crate::transfer::uploader::UploadFailure;
use crate::validator::FixityDiff;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Manifest encoding error: line {line} of {} is not valid UTF-8", path.display())]
    Encoding { path: PathBuf, line: usize },

    #[error("Manifest format error: line {line} of {} has {fields} field(s), expected 2: {content:?}", path.display())]
    Format {
        path: PathBuf,
        line: usize,
        fields: usize,
        content: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path {} is not valid UTF-8 and cannot be keyed", path.display())]
    NonUtf8Path { path: PathBuf },

    #[error("Fixity check failed: {0}")]
    FixityMismatch(Box<FixityDiff>),

    #[error("{} of {attempted} upload(s) failed", failures.len())]
    Upload {
        attempted: usize,
        failures: Vec<UploadFailure>,
    },

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl ReplicateError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReplicateError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this failure class.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReplicateError::Config(_) => 2,
            ReplicateError::Encoding { .. } | ReplicateError::Format { .. } => 3,
            ReplicateError::Io { .. } | ReplicateError::NonUtf8Path { .. } => 4,
            ReplicateError::FixityMismatch(_) => 5,
            ReplicateError::Upload { .. } => 6,
            ReplicateError::Store(_) => 7,
            ReplicateError::Serialization(_) => 1,
            ReplicateError::Cancelled => 130,
        }
    }
}

/// Errors reported by an object store implementation.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),

    #[error("store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("content digest mismatch: sent {expected}, store computed {actual}")]
    BadDigest { expected: String, actual: String },

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not read upload body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReplicateError>;
