//! Ignore rules shared by the manifest reader, the scanner and the uploader.
//!
//! Matching is plain substring containment. The manifest side tests the whole
//! relative path, the filesystem side tests only the file name.

use std::collections::BTreeSet;
use tracing::trace;

/// Platform files that never belong to a collection.
pub const PLATFORM_NOISE: &[&str] = &["Thumbs.db", ".DS_Store", "desktop.ini"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    patterns: BTreeSet<String>,
}

impl IgnoreSet {
    /// Platform noise plus the manifest's own file name.
    pub fn for_manifest(manifest_name: &str) -> Self {
        let mut set = Self::default();
        for noise in PLATFORM_NOISE {
            set.insert(*noise);
        }
        set.insert(manifest_name);
        set
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for p in patterns {
            self.insert(p);
        }
        self
    }

    /// Empty patterns are dropped; they would match everything.
    pub fn insert(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        if !pattern.is_empty() {
            self.patterns.insert(pattern);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True when any pattern occurs anywhere in `path`.
    pub fn is_ignored(&self, path: &str) -> bool {
        match self.patterns.iter().find(|p| path.contains(p.as_str())) {
            Some(pattern) => {
                trace!(path, pattern = pattern.as_str(), "ignored");
                true
            }
            None => false,
        }
    }

    /// Filesystem-side rule: only the final path component is tested.
    pub fn is_ignored_file_name(&self, relative_path: &str) -> bool {
        let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.is_ignored(file_name)
    }

    /// Keep the paths that are not ignored.
    pub fn filter<'a, I>(&self, paths: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths.into_iter().filter(|p| !self.is_ignored(p)).collect()
    }
}
