//! Upload side of replication.

pub mod progress;
pub mod upload_body;
pub mod uploader;

pub use uploader::{ReplicationUploader, UploadFailure, UploadOptions, UploadReport};
