//! Directory traversal and fixity hashing.
//!
//! The walk itself is sequential; hashing is fanned out over a bounded pool
//! of blocking tasks and merged into the map after every task has joined.

use crate::fs::checksum::{md5_file, FileDigest};
use crate::fs::ignore::IgnoreSet;
use crate::utils::errors::{ReplicateError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Relative path (forward slashes) to fixity digest.
pub type FilesystemMap = HashMap<String, FileDigest>;

/// A regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the scan root, slash-separated
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    /// Symlinks are resolved to their target; links to directories and
    /// broken links yield `None`.
    fn from_entry(entry: &DirEntry, relative_path: String) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let size = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => resolved.len(),
                Err(_) => {
                    debug!("Skipping broken symlink: {}", path.display());
                    return Ok(None);
                }
            }
        } else {
            entry.metadata()?.len()
        };

        Ok(Some(Self {
            relative_path,
            path,
            size,
        }))
    }
}

/// Result of walking a tree, before hashing.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<FileInfo>,
    pub ignored: usize,
}

/// Result of a full scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub files: FilesystemMap,
    pub processed: usize,
    pub ignored: usize,
    pub total_bytes: u64,
}

/// Strip the root prefix and join the remaining components with `/`.
///
/// `None` when a component is not valid UTF-8; a lossy key could merge two
/// distinct files into one entry.
pub fn relative_path(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

/// Walk `root` and collect every regular file whose name is not ignored.
pub fn walk_directory(root: &Path, ignore: &IgnoreSet) -> Result<WalkOutcome> {
    let mut outcome = WalkOutcome::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            ReplicateError::io(path, e.into())
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        if ignore.is_ignored(&entry.file_name().to_string_lossy()) {
            outcome.ignored += 1;
            continue;
        }

        let rel = relative_path(entry.path(), root).ok_or_else(|| ReplicateError::NonUtf8Path {
            path: entry.path().to_path_buf(),
        })?;
        if let Some(file_info) = FileInfo::from_entry(&entry, rel)
            .map_err(|e| ReplicateError::io(entry.path(), e))?
        {
            outcome.files.push(file_info);
        }
    }

    Ok(outcome)
}

/// Walk and hash on the calling thread, in walk order.
pub fn scan_directory(root: &Path, ignore: &IgnoreSet) -> Result<ScanReport> {
    let walk = walk_directory(root, ignore)?;
    let mut report = ScanReport {
        ignored: walk.ignored,
        ..Default::default()
    };

    for file in walk.files {
        let digest = md5_file(&file.path).map_err(|e| ReplicateError::io(&file.path, e))?;
        debug!(path = %file.relative_path, md5 = %digest.hex, "hashed");
        report.total_bytes += file.size;
        report.processed += 1;
        report.files.insert(file.relative_path, digest);
    }

    log_scan(root, &report);
    Ok(report)
}

/// Walk and hash with at most `workers` files in flight.
///
/// The first unreadable file stops further dispatch and fails the scan.
/// With `workers == 1` files are hashed strictly one at a time in walk order.
pub async fn scan_directory_with_workers(
    root: &Path,
    ignore: &IgnoreSet,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<ScanReport> {
    let walk_root = root.to_path_buf();
    let walk_ignore = ignore.clone();
    let walk = tokio::task::spawn_blocking(move || walk_directory(&walk_root, &walk_ignore))
        .await
        .map_err(|e| ReplicateError::io(root, std::io::Error::other(e)))??;

    info!(
        "Walked {}: {} candidate files, {} ignored",
        root.display(),
        walk.files.len(),
        walk.ignored
    );

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let stop = cancel.child_token();
    let mut handles = Vec::with_capacity(walk.files.len());

    for file in walk.files {
        if stop.is_cancelled() {
            break;
        }
        let permit = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.map_err(|e| ReplicateError::io(root, std::io::Error::other(e)))?
            }
        };

        let task_stop = stop.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = md5_file(&file.path);
            if result.is_err() {
                task_stop.cancel();
            }
            (file, result)
        }));
    }

    let mut report = ScanReport {
        ignored: walk.ignored,
        ..Default::default()
    };
    let mut first_error = None;

    for handle in handles {
        let (file, result) = handle
            .await
            .map_err(|e| ReplicateError::io(root, std::io::Error::other(e)))?;
        match result {
            Ok(digest) => {
                debug!(path = %file.relative_path, md5 = %digest.hex, "hashed");
                report.total_bytes += file.size;
                report.processed += 1;
                report.files.insert(file.relative_path, digest);
            }
            Err(e) => {
                warn!("Failed to read {}: {}", file.path.display(), e);
                if first_error.is_none() {
                    first_error = Some(ReplicateError::io(&file.path, e));
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if cancel.is_cancelled() {
        return Err(ReplicateError::Cancelled);
    }

    log_scan(root, &report);
    Ok(report)
}

fn log_scan(root: &Path, report: &ScanReport) {
    info!(
        processed = report.processed,
        ignored = report.ignored,
        bytes = report.total_bytes,
        "Filesystem scan of {} complete",
        root.display()
    );
}
