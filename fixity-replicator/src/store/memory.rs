//! In-process object store.
//!
//! Checks `Content-MD5` against the received bytes the way S3 does, so digest
//! rejection can be exercised without a network.

use super::{BucketPermissions, ObjectId, ObjectStore, PutObjectRequest};
use crate::fs::checksum::md5_bytes;
use crate::transfer::upload_body::UploadBody;
use crate::utils::errors::StoreError;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use futures_util::StreamExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
    pub etag: String,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BucketPermissions>>,
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    failing_keys: Mutex<HashSet<String>>,
    put_delay: Option<Duration>,
    put_attempts: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.with_bucket_permissions(bucket, BucketPermissions::READ_WRITE)
    }

    pub fn with_bucket_permissions(self, bucket: &str, permissions: BucketPermissions) -> Self {
        lock(&self.buckets).insert(bucket.to_string(), permissions);
        self
    }

    /// Every put of `key` is rejected with a 500.
    pub fn with_failing_key(self, key: &str) -> Self {
        lock(&self.failing_keys).insert(key.to_string());
        self
    }

    /// Sleep before each put, for timeout and cancellation paths.
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    pub fn head_object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Sorted keys stored in `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects)
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of puts received, including rejected ones.
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, request: PutObjectRequest) -> Result<ObjectId, StoreError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }

        let permissions = lock(&self.buckets).get(&request.bucket).copied();
        match permissions {
            None => return Err(StoreError::NoSuchBucket(request.bucket)),
            Some(p) if !p.write => {
                return Err(StoreError::Rejected {
                    status: 403,
                    body: "AccessDenied".to_string(),
                })
            }
            Some(_) => {}
        }

        if lock(&self.failing_keys).contains(&request.key) {
            return Err(StoreError::Rejected {
                status: 500,
                body: "InternalError".to_string(),
            });
        }

        let mut stream =
            UploadBody::from_file(request.body, request.key.as_str(), request.content_length);
        let mut body = Vec::with_capacity(request.content_length as usize);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StoreError::Body(e.to_string()))?;
            body.extend_from_slice(&chunk);
        }

        let digest = md5_bytes(&body);
        if digest.base64() != request.content_md5 {
            return Err(StoreError::BadDigest {
                expected: request.content_md5,
                actual: digest.base64(),
            });
        }

        let etag = digest.hex;
        lock(&self.objects).insert(
            (request.bucket, request.key),
            StoredObject {
                body,
                metadata: request.metadata,
                etag: etag.clone(),
            },
        );

        Ok(ObjectId(etag))
    }

    async fn bucket_permissions(&self, bucket: &str) -> Result<BucketPermissions, StoreError> {
        lock(&self.buckets)
            .get(bucket)
            .copied()
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))
    }
}
