//! Replication target URIs of the form `s3://bucket/prefix`.

use crate::utils::errors::{ReplicateError, Result};
use serde::Serialize;
use std::fmt;

pub const OBJECT_STORE_SCHEME: &str = "s3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicationTarget {
    pub scheme: String,
    pub bucket: String,
    /// Empty, or ends with exactly one `/`
    pub key_prefix: String,
}

impl ReplicationTarget {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| ReplicateError::Config(format!("target {uri:?} is not a URI")))?;

        if !scheme.eq_ignore_ascii_case(OBJECT_STORE_SCHEME) {
            return Err(ReplicateError::Config(format!(
                "unsupported target scheme {scheme:?}, expected {OBJECT_STORE_SCHEME}://"
            )));
        }

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(ReplicateError::Config(format!("target {uri:?} has no bucket")));
        }

        let prefix = prefix.trim_matches('/');
        let key_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };

        Ok(Self {
            scheme: OBJECT_STORE_SCHEME.to_string(),
            bucket: bucket.to_string(),
            key_prefix,
        })
    }

    /// Remote key for a slash-separated relative path.
    pub fn object_key(&self, relative_path: &str) -> String {
        format!("{}{}", self.key_prefix, relative_path.trim_start_matches('/'))
    }
}

impl fmt::Display for ReplicationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key_prefix)
    }
}
