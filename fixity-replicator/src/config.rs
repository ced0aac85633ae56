//! Configuration management for the fixity replicator.
//!
//! Settings are layered: built-in defaults, an optional TOML file, then
//! `FIXITY_*` environment variables. Command-line flags are applied on top by
//! the binary before `validate` runs.

use crate::fs::ignore::IgnoreSet;
use crate::manifest::{DEFAULT_MANIFEST_NAME, DEFAULT_SEPARATOR};
use crate::target::ReplicationTarget;
use crate::transfer::uploader::{UploadOptions, DEFAULT_UPLOAD_WORKERS};
use crate::utils::errors::{ReplicateError, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "FIXITY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the collection to verify and replicate
    pub source_dir: PathBuf,

    /// Manifest file name, inside `source_dir`
    pub manifest_name: String,

    /// Compare manifest and filesystem before replicating
    pub fixity: bool,

    /// Manifest field separator
    pub separator: String,

    /// Destination, `s3://bucket/prefix`
    pub target: String,

    /// Base URL of an S3-compatible gateway that authenticates this client
    pub endpoint: String,

    /// Pre-shared key or bearer token sent to the gateway
    pub token: Option<String>,

    /// Mirror log lines to stdout
    pub verbose: bool,

    /// Where the run's log file and report are written
    pub log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Extra ignore substrings on top of platform noise and the manifest
    pub extra_ignores: Vec<String>,

    /// Files hashed concurrently (1 = sequential)
    pub hash_workers: usize,

    /// Files uploaded concurrently (1 = sequential)
    pub upload_workers: usize,

    /// Per-upload timeout in seconds
    pub upload_timeout_secs: u64,

    /// Stop dispatching uploads after the first failure
    pub fail_fast: bool,

    /// Write a JSON run report next to the log file
    pub report: bool,
}

fn default_hash_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            source_dir: PathBuf::new(),
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            fixity: false,
            separator: DEFAULT_SEPARATOR.to_string(),
            target: String::new(),
            endpoint: String::new(),
            token: None,
            verbose: false,
            log_dir: PathBuf::from("/tmp"),
            log_level: "info".to_string(),
            extra_ignores: Vec::new(),
            hash_workers: default_hash_workers(),
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            upload_timeout_secs: 300,
            fail_fast: false,
            report: true,
        }
    }
}

/// Settings after validation, ready for a run.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub source_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub fixity: bool,
    pub separator: String,
    pub target: ReplicationTarget,
    pub endpoint: String,
    pub token: Option<String>,
    pub log_dir: PathBuf,
    pub ignore: IgnoreSet,
    pub hash_workers: usize,
    pub upload: UploadOptions,
    pub report: bool,
}

impl Settings {
    /// Load settings from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ReplicateError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("extra_ignores"),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Settings>())
            .map_err(|e| ReplicateError::Config(e.to_string()))
    }

    /// Check everything that can be checked before any work starts.
    pub fn validate(self) -> Result<ReplicationConfig> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(ReplicateError::Config("no source directory given".into()));
        }
        if !self.source_dir.is_dir() {
            return Err(ReplicateError::Config(format!(
                "source directory {} does not exist or is not a directory",
                self.source_dir.display()
            )));
        }
        if self.separator.is_empty() {
            return Err(ReplicateError::Config("manifest separator is empty".into()));
        }
        if self.manifest_name.trim().is_empty() {
            return Err(ReplicateError::Config("manifest name is empty".into()));
        }

        let manifest_path = self.source_dir.join(&self.manifest_name);
        if self.fixity && !manifest_path.is_file() {
            return Err(ReplicateError::Config(format!(
                "fixity requested but manifest {} does not exist",
                manifest_path.display()
            )));
        }

        check_writable_dir(&self.log_dir)?;
        let target = ReplicationTarget::parse(&self.target)?;
        if self.endpoint.trim().is_empty() {
            return Err(ReplicateError::Config(
                "no object store endpoint given (an S3-compatible gateway URL)".into(),
            ));
        }

        if self.hash_workers == 0 || self.upload_workers == 0 {
            return Err(ReplicateError::Config("worker counts must be at least 1".into()));
        }
        if self.upload_timeout_secs == 0 {
            return Err(ReplicateError::Config("upload timeout must be positive".into()));
        }

        let ignore = IgnoreSet::for_manifest(&self.manifest_name).with_patterns(self.extra_ignores);

        Ok(ReplicationConfig {
            source_dir: self.source_dir,
            manifest_path,
            fixity: self.fixity,
            separator: self.separator,
            target,
            endpoint: self.endpoint,
            token: self.token.filter(|t| !t.is_empty()),
            log_dir: self.log_dir,
            ignore,
            hash_workers: self.hash_workers,
            upload: UploadOptions {
                workers: self.upload_workers,
                timeout: Duration::from_secs(self.upload_timeout_secs),
                fail_fast: self.fail_fast,
            },
            report: self.report,
        })
    }
}

fn check_writable_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(ReplicateError::Config(format!(
            "log directory {} does not exist",
            dir.display()
        )));
    }

    let probe = dir.join(format!(".fixity-replicate-probe-{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .map_err(|e| {
            ReplicateError::Config(format!("log directory {} is not writable: {}", dir.display(), e))
        })?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}
