//! Replication of verified files to the object store.
//!
//! Every entry is attempted; a failed upload is recorded and the batch carries
//! on. Dispatch stops early only on cancellation or when `fail_fast` is set.
//! In-flight uploads always run to completion.

use crate::fs::checksum::FileDigest;
use crate::fs::ignore::IgnoreSet;
use crate::fs::walker::FilesystemMap;
use crate::store::{ObjectId, ObjectStore, PutObjectRequest, METADATA_MD5, METADATA_MD5_BASE64};
use crate::target::ReplicationTarget;
use crate::utils::errors::{ReplicateError, Result, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_UPLOAD_WORKERS: usize = 4;
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Concurrent uploads; 1 uploads strictly in key order
    pub workers: usize,
    /// Bound on each put, including the body transfer
    pub timeout: Duration,
    /// Stop dispatching after the first failure
    pub fail_fast: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_UPLOAD_WORKERS,
            timeout: DEFAULT_UPLOAD_TIMEOUT,
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedObject {
    pub key: String,
    pub object_id: ObjectId,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFailure {
    pub key: String,
    pub error: String,
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.error)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct UploadReport {
    pub uploaded: Vec<UploadedObject>,
    pub failed: Vec<UploadFailure>,
    /// Entries dropped by the ignore rule before dispatch
    pub skipped_ignored: Vec<String>,
    /// Entries never dispatched because of cancellation or `fail_fast`
    pub not_attempted: usize,
    pub bytes: u64,
    pub cancelled: bool,
}

impl UploadReport {
    pub fn attempted(&self) -> usize {
        self.uploaded.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.not_attempted == 0 && !self.cancelled
    }

    /// Run-level verdict: cancellation first, then any per-file failure.
    pub fn status(&self) -> Result<()> {
        if self.cancelled {
            return Err(ReplicateError::Cancelled);
        }
        if !self.failed.is_empty() {
            return Err(ReplicateError::Upload {
                attempted: self.attempted(),
                failures: self.failed.clone(),
            });
        }
        Ok(())
    }
}

pub struct ReplicationUploader<S> {
    store: Arc<S>,
    target: Arc<ReplicationTarget>,
    source_root: Arc<PathBuf>,
    ignore: IgnoreSet,
    options: UploadOptions,
    cancel: CancellationToken,
}

impl<S: ObjectStore> ReplicationUploader<S> {
    pub fn new(
        store: Arc<S>,
        target: ReplicationTarget,
        source_root: PathBuf,
        ignore: IgnoreSet,
        options: UploadOptions,
    ) -> Self {
        Self {
            store,
            target: Arc::new(target),
            source_root: Arc::new(source_root),
            ignore,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop dispatching new uploads once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Upload every entry of `files`, in key order.
    pub async fn upload_all(&self, files: FilesystemMap) -> UploadReport {
        let files = Arc::new(files);
        let mut paths: Vec<String> = files.keys().cloned().collect();
        paths.sort();

        info!(
            "Replicating {} files to {} ({} workers)",
            paths.len(),
            self.target,
            self.options.workers
        );

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let stop = self.cancel.child_token();
        let mut report = UploadReport::default();
        let mut handles = Vec::with_capacity(paths.len());

        for relative_path in &paths {
            if self.ignore.is_ignored_file_name(relative_path) {
                warn!(path = %relative_path, "Ignored file reached the uploader, skipping");
                report.skipped_ignored.push(relative_path.clone());
                continue;
            }
            if stop.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let store = Arc::clone(&self.store);
            let target = Arc::clone(&self.target);
            let source_root = Arc::clone(&self.source_root);
            let files = Arc::clone(&files);
            let relative_path = relative_path.clone();
            let timeout = self.options.timeout;
            let fail_fast = self.options.fail_fast;
            let task_stop = stop.clone();
            let key = target.object_key(&relative_path);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let Some(digest) = files.get(&relative_path) else {
                    return Err(UploadFailure {
                        key: target.object_key(&relative_path),
                        error: "entry vanished from verified map".to_string(),
                    });
                };
                let result = upload_file(
                    store.as_ref(),
                    &target,
                    &source_root,
                    &relative_path,
                    digest,
                    timeout,
                )
                .await;
                if result.is_err() && fail_fast {
                    task_stop.cancel();
                }
                result
            });

            handles.push((key, handle));
        }

        let dispatched = handles.len();
        for (key, handle) in handles {
            match handle.await {
                Ok(Ok(uploaded)) => {
                    report.bytes += uploaded.bytes;
                    report.uploaded.push(uploaded);
                }
                Ok(Err(failure)) => report.failed.push(failure),
                Err(e) => {
                    error!(key = %key, "Upload task panicked: {}", e);
                    report.failed.push(UploadFailure {
                        key,
                        error: format!("upload task failed: {e}"),
                    });
                }
            }
        }

        report.not_attempted = paths.len() - dispatched - report.skipped_ignored.len();
        report.cancelled = self.cancel.is_cancelled();
        report.uploaded.sort_by(|a, b| a.key.cmp(&b.key));
        report.failed.sort_by(|a, b| a.key.cmp(&b.key));

        info!(
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            not_attempted = report.not_attempted,
            skipped_ignored = report.skipped_ignored.len(),
            bytes = report.bytes,
            "Replication finished"
        );
        for failure in &report.failed {
            error!(key = %failure.key, error = %failure.error, "Upload failed");
        }

        report
    }
}

/// Stream one file to the store with its fixity metadata attached.
async fn upload_file<S: ObjectStore>(
    store: &S,
    target: &ReplicationTarget,
    source_root: &Path,
    relative_path: &str,
    digest: &FileDigest,
    timeout: Duration,
) -> std::result::Result<UploadedObject, UploadFailure> {
    let key = target.object_key(relative_path);
    let path = source_root.join(relative_path);
    let fail = |error: String| UploadFailure {
        key: key.clone(),
        error,
    };

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| fail(format!("failed to open {}: {}", path.display(), e)))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| fail(format!("failed to stat {}: {}", path.display(), e)))?
        .len();

    let mut metadata = BTreeMap::new();
    metadata.insert(METADATA_MD5.to_string(), digest.hex.clone());
    metadata.insert(METADATA_MD5_BASE64.to_string(), digest.base64());

    let request = PutObjectRequest {
        bucket: target.bucket.clone(),
        key: key.clone(),
        body: file,
        content_length: size,
        content_md5: digest.base64(),
        metadata,
    };

    let result = match tokio::time::timeout(timeout, store.put_object(request)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout.as_secs())),
    };

    match result {
        Ok(object_id) => {
            info!(key = %key, etag = %object_id, bytes = size, "Uploaded {}", path.display());
            Ok(UploadedObject {
                key: key.clone(),
                object_id,
                bytes: size,
            })
        }
        Err(e) => {
            error!(key = %key, "Upload of {} failed: {}", path.display(), e);
            Err(fail(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::walker::scan_directory;
    use crate::store::memory::MemoryObjectStore;
    use std::fs;
    use tempfile::TempDir;

    const BUCKET: &str = "archive";

    fn collection(files: &[(&str, &str)]) -> (TempDir, FilesystemMap) {
        let dir = TempDir::new().unwrap();
        for (path, contents) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, contents).unwrap();
        }
        let scanned = scan_directory(dir.path(), &IgnoreSet::default()).unwrap();
        (dir, scanned.files)
    }

    fn uploader(
        store: Arc<MemoryObjectStore>,
        root: &Path,
        options: UploadOptions,
    ) -> ReplicationUploader<MemoryObjectStore> {
        ReplicationUploader::new(
            store,
            ReplicationTarget::parse("s3://archive/collections/c1").unwrap(),
            root.to_path_buf(),
            IgnoreSet::for_manifest("checksum-md5.txt"),
            options,
        )
    }

    #[tokio::test]
    async fn test_uploads_with_fixity_metadata() {
        let (dir, files) = collection(&[("a.txt", "alpha"), ("sub/b.txt", "beta")]);
        let store = Arc::new(MemoryObjectStore::new().with_bucket(BUCKET));

        let report = uploader(Arc::clone(&store), dir.path(), UploadOptions::default())
            .upload_all(files.clone())
            .await;

        assert!(report.is_success());
        assert_eq!(report.uploaded.len(), 2);
        assert_eq!(report.bytes, 9);
        assert_eq!(
            store.keys(BUCKET),
            vec!["collections/c1/a.txt".to_string(), "collections/c1/sub/b.txt".to_string()]
        );

        let stored = store.head_object(BUCKET, "collections/c1/sub/b.txt").unwrap();
        let local = &files["sub/b.txt"];
        assert_eq!(stored.body, b"beta");
        assert_eq!(stored.metadata[METADATA_MD5], local.hex);
        assert_eq!(stored.metadata[METADATA_MD5_BASE64], local.base64());
        assert_eq!(report.uploaded[1].object_id.0, local.hex);
    }

    #[tokio::test]
    async fn test_failures_are_collected_not_fatal() {
        let (dir, files) = collection(&[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]);
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_bucket(BUCKET)
                .with_failing_key("collections/c1/a.txt"),
        );
        let options = UploadOptions {
            workers: 1,
            ..Default::default()
        };

        let report = uploader(Arc::clone(&store), dir.path(), options)
            .upload_all(files)
            .await;

        assert_eq!(report.attempted(), 3);
        assert_eq!(report.uploaded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "collections/c1/a.txt");
        assert!(matches!(
            report.status(),
            Err(ReplicateError::Upload { attempted: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_dispatch() {
        let (dir, files) = collection(&[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]);
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_bucket(BUCKET)
                .with_failing_key("collections/c1/a.txt"),
        );
        let options = UploadOptions {
            workers: 1,
            fail_fast: true,
            ..Default::default()
        };

        let report = uploader(Arc::clone(&store), dir.path(), options)
            .upload_all(files)
            .await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.not_attempted, 2);
        assert_eq!(store.put_attempts(), 1);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_ignored_entries_are_never_uploaded() {
        let (dir, files) = collection(&[("a.txt", "a"), ("Thumbs.db", "noise")]);
        let store = Arc::new(MemoryObjectStore::new().with_bucket(BUCKET));

        let report = uploader(Arc::clone(&store), dir.path(), UploadOptions::default())
            .upload_all(files)
            .await;

        assert_eq!(report.skipped_ignored, vec!["Thumbs.db".to_string()]);
        assert_eq!(store.put_attempts(), 1);
        assert!(store.head_object(BUCKET, "collections/c1/Thumbs.db").is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_per_file_failure() {
        let (dir, files) = collection(&[("a.txt", "a")]);
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_bucket(BUCKET)
                .with_put_delay(Duration::from_secs(5)),
        );
        let options = UploadOptions {
            workers: 1,
            timeout: Duration::from_millis(50),
            fail_fast: false,
        };

        let report = uploader(store, dir.path(), options).upload_all(files).await;

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch_and_waits_for_in_flight() {
        let (dir, files) = collection(&[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]);
        let store = Arc::new(
            MemoryObjectStore::new()
                .with_bucket(BUCKET)
                .with_put_delay(Duration::from_millis(200)),
        );
        let options = UploadOptions {
            workers: 1,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = uploader(Arc::clone(&store), dir.path(), options)
            .with_cancel(cancel)
            .upload_all(files)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.not_attempted, 2);
        assert!(matches!(report.status(), Err(ReplicateError::Cancelled)));
    }

    #[tokio::test]
    async fn test_missing_source_file_is_failure() {
        let (dir, mut files) = collection(&[("a.txt", "a")]);
        files.insert("gone.txt".to_string(), crate::fs::checksum::md5_bytes(b""));
        let store = Arc::new(MemoryObjectStore::new().with_bucket(BUCKET));

        let report = uploader(Arc::clone(&store), dir.path(), UploadOptions::default())
            .upload_all(files)
            .await;

        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("failed to open"));
    }
}
