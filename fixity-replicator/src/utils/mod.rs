//! Utility modules for the fixity replicator.

pub mod errors;
pub mod logger;

pub use errors::{ReplicateError, Result, StoreError};
