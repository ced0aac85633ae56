//! Fixity Replicator Library
//!
//! Verifies a collection directory against its MD5 checksum manifest and
//! replicates the verified files to an S3-compatible object store, attaching
//! the digests as object metadata.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod manifest;
pub mod store;
pub mod target;
pub mod transfer;
pub mod utils;
pub mod validator;

// Re-export commonly used types
pub use config::{ReplicationConfig, Settings};
pub use executor::{ReplicationExecutor, RunSummary};
pub use utils::errors::{ReplicateError, Result, StoreError};
