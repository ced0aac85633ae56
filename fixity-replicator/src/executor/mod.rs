//! Replication run executor - ties the pipeline together.
//!
//! manifest (when fixity is requested) -> scan -> validate -> bucket
//! preflight -> upload. Any failure before the upload stage stops the run
//! without contacting the store for writes.

use crate::config::ReplicationConfig;
use crate::fs::walker::{scan_directory_with_workers, FilesystemMap};
use crate::manifest::read_manifest;
use crate::store::ObjectStore;
use crate::transfer::progress::Throughput;
use crate::transfer::uploader::{ReplicationUploader, UploadReport};
use crate::utils::errors::{ReplicateError, Result, StoreError};
use crate::validator::{validate, FixityDiff, MatchResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything a run did, serialized as the JSON run report.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub source_dir: PathBuf,
    pub target: String,
    pub fixity_checked: bool,
    pub manifest_lines_read: Option<usize>,
    pub manifest_records: Option<usize>,
    pub manifest_retained: Option<usize>,
    pub files_scanned: usize,
    pub files_ignored: usize,
    pub bytes_scanned: u64,
    pub fixity_diff: Option<FixityDiff>,
    pub upload: Option<UploadReport>,
    pub error: Option<String>,
    pub exit_code: u8,
}

impl RunSummary {
    fn new(config: &ReplicationConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            started_at: Utc::now(),
            finished_at: None,
            source_dir: config.source_dir.clone(),
            target: config.target.to_string(),
            fixity_checked: config.fixity,
            manifest_lines_read: None,
            manifest_records: None,
            manifest_retained: None,
            files_scanned: 0,
            files_ignored: 0,
            bytes_scanned: 0,
            fixity_diff: None,
            upload: None,
            error: None,
            exit_code: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct ReplicationExecutor<S> {
    config: ReplicationConfig,
    store: Arc<S>,
    cancel: CancellationToken,
}

impl<S: ObjectStore> ReplicationExecutor<S> {
    pub fn new(config: ReplicationConfig, store: Arc<S>) -> Self {
        Self {
            config,
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the pipeline once. The run report, when enabled, is written for
    /// failed runs as well as successful ones.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::new(&self.config);
        info!(
            run_id = %summary.run_id,
            "Starting replication of {} to {} (fixity: {})",
            self.config.source_dir.display(),
            self.config.target,
            self.config.fixity
        );

        let result = self.replicate(&mut summary).await;

        summary.finished_at = Some(Utc::now());
        if let Err(e) = &result {
            error!(run_id = %summary.run_id, "Run failed: {}", e);
            summary.error = Some(e.to_string());
            summary.exit_code = e.exit_code();
        }

        if self.config.report {
            match self.write_report(&summary) {
                Ok(path) => info!("Run report written to {}", path.display()),
                Err(e) => warn!("Failed to write run report: {}", e),
            }
        }

        result.map(|_| summary)
    }

    async fn replicate(&self, summary: &mut RunSummary) -> Result<()> {
        let manifest = if self.config.fixity {
            let path = self.config.manifest_path.clone();
            let separator = self.config.separator.clone();
            let ignore = self.config.ignore.clone();
            let manifest = tokio::task::spawn_blocking(move || {
                read_manifest(&path, &separator, &ignore)
            })
            .await
            .map_err(|e| ReplicateError::io(&self.config.manifest_path, std::io::Error::other(e)))??;

            summary.manifest_lines_read = Some(manifest.lines_read);
            summary.manifest_records = Some(manifest.records);
            summary.manifest_retained = Some(manifest.retained);
            Some(manifest)
        } else {
            None
        };

        let scan = scan_directory_with_workers(
            &self.config.source_dir,
            &self.config.ignore,
            self.config.hash_workers,
            &self.cancel,
        )
        .await?;
        summary.files_scanned = scan.processed;
        summary.files_ignored = scan.ignored;
        summary.bytes_scanned = scan.total_bytes;

        let files: FilesystemMap = match manifest {
            Some(manifest) => match validate(&manifest.entries, scan.files) {
                MatchResult::Match(files) => files,
                MatchResult::Mismatch(diff) => {
                    summary.fixity_diff = Some(diff.clone());
                    return Err(ReplicateError::FixityMismatch(Box::new(diff)));
                }
            },
            None => {
                info!("Fixity check not requested, replicating scanned files as-is");
                scan.files
            }
        };

        let bucket = &self.config.target.bucket;
        let permissions = self.store.bucket_permissions(bucket).await?;
        if !permissions.write {
            return Err(ReplicateError::Store(StoreError::Rejected {
                status: 403,
                body: format!("no write permission on bucket {bucket}"),
            }));
        }

        if self.cancel.is_cancelled() {
            return Err(ReplicateError::Cancelled);
        }

        let throughput = Throughput::start();
        let uploader = ReplicationUploader::new(
            Arc::clone(&self.store),
            self.config.target.clone(),
            self.config.source_dir.clone(),
            self.config.ignore.clone(),
            self.config.upload.clone(),
        )
        .with_cancel(self.cancel.clone());

        let report = uploader.upload_all(files).await;
        info!(
            "Replicated {} file(s): {}",
            report.uploaded.len(),
            throughput.summary(report.bytes)
        );

        let status = report.status();
        summary.upload = Some(report);
        status
    }

    fn write_report(&self, summary: &RunSummary) -> Result<PathBuf> {
        let path = self.config.log_dir.join(format!(
            "fixity-report-{}-{}.json",
            summary.started_at.format("%Y%m%dT%H%M%SZ"),
            summary.run_id.simple()
        ));
        let file = File::create(&path).map_err(|e| ReplicateError::io(&path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), summary)?;
        Ok(path)
    }
}
