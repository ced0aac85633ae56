//! Manifest/filesystem comparison.
//!
//! Both maps arrive already filtered by their own ignore rule; nothing is
//! filtered here.

use crate::fs::walker::FilesystemMap;
use crate::manifest::ManifestMap;
use crate::utils::errors::{ReplicateError, Result};
use serde::Serialize;
use std::fmt;
use tracing::{error, info};

/// A path whose recorded checksum differs from the file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedEntry {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

/// Every difference between the two sides, each list sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FixityDiff {
    /// On disk but absent from the manifest
    pub filesystem_only: Vec<String>,
    /// In the manifest but absent from disk
    pub manifest_only: Vec<String>,
    pub changed: Vec<ChangedEntry>,
}

impl FixityDiff {
    pub fn is_empty(&self) -> bool {
        self.filesystem_only.is_empty() && self.manifest_only.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filesystem_only.len() + self.manifest_only.len() + self.changed.len()
    }
}

impl fmt::Display for FixityDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} difference(s): {} filesystem-only, {} manifest-only, {} changed",
            self.len(),
            self.filesystem_only.len(),
            self.manifest_only.len(),
            self.changed.len()
        )?;
        for path in &self.filesystem_only {
            write!(f, "\n  filesystem-only: {path}")?;
        }
        for path in &self.manifest_only {
            write!(f, "\n  manifest-only: {path}")?;
        }
        for entry in &self.changed {
            write!(
                f,
                "\n  changed: {} (expected {}, actual {})",
                entry.path, entry.expected, entry.actual
            )?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum MatchResult {
    /// The verified map, ready for upload
    Match(FilesystemMap),
    Mismatch(FixityDiff),
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match(_))
    }

    pub fn into_result(self) -> Result<FilesystemMap> {
        match self {
            MatchResult::Match(files) => Ok(files),
            MatchResult::Mismatch(diff) => Err(ReplicateError::FixityMismatch(Box::new(diff))),
        }
    }
}

/// Structural diff of the two maps. Checksums compare case-insensitively.
pub fn diff(manifest: &ManifestMap, filesystem: &FilesystemMap) -> FixityDiff {
    let mut diff = FixityDiff::default();

    for (path, digest) in filesystem {
        match manifest.get(path) {
            None => diff.filesystem_only.push(path.clone()),
            Some(expected) if !expected.eq_ignore_ascii_case(&digest.hex) => {
                diff.changed.push(ChangedEntry {
                    path: path.clone(),
                    expected: expected.clone(),
                    actual: digest.hex.clone(),
                });
            }
            Some(_) => {}
        }
    }

    diff.manifest_only = manifest
        .keys()
        .filter(|path| !filesystem.contains_key(*path))
        .cloned()
        .collect();

    diff.filesystem_only.sort();
    diff.manifest_only.sort();
    diff.changed.sort_by(|a, b| a.path.cmp(&b.path));
    diff
}

/// Exact map equality: same key set, same checksum per key.
pub fn validate(manifest: &ManifestMap, filesystem: FilesystemMap) -> MatchResult {
    let diff = diff(manifest, &filesystem);

    if diff.is_empty() {
        info!(files = filesystem.len(), "Fixity check passed");
        return MatchResult::Match(filesystem);
    }

    error!(
        filesystem_only = diff.filesystem_only.len(),
        manifest_only = diff.manifest_only.len(),
        changed = diff.changed.len(),
        "Fixity check failed"
    );
    for path in &diff.filesystem_only {
        error!(path = %path, "filesystem-only: not listed in manifest");
    }
    for path in &diff.manifest_only {
        error!(path = %path, "manifest-only: missing from filesystem");
    }
    for entry in &diff.changed {
        error!(
            path = %entry.path,
            expected = %entry.expected,
            actual = %entry.actual,
            "changed: checksum mismatch"
        );
    }

    MatchResult::Mismatch(diff)
}
