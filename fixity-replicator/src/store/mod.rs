//! Object store capability used by the uploader.
//!
//! The store arrives pre-authenticated; this crate never handles credentials.

pub mod http;
pub mod memory;

use crate::utils::errors::StoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

/// Metadata key holding the hex MD5.
pub const METADATA_MD5: &str = "fixity-md5";
/// Metadata key holding the base64 of the raw MD5 digest.
pub const METADATA_MD5_BASE64: &str = "fixity-md5b64";

/// Store-assigned identifier for a written object (the ETag for S3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single object write.
#[derive(Debug)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: tokio::fs::File,
    pub content_length: u64,
    /// Base64 MD5 the store must check the received bytes against
    pub content_md5: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketPermissions {
    pub read: bool,
    pub write: bool,
}

impl BucketPermissions {
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };
}

pub trait ObjectStore: Send + Sync + 'static {
    fn put_object(
        &self,
        request: PutObjectRequest,
    ) -> impl Future<Output = Result<ObjectId, StoreError>> + Send;

    fn bucket_permissions(
        &self,
        bucket: &str,
    ) -> impl Future<Output = Result<BucketPermissions, StoreError>> + Send;
}
