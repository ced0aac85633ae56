//! Logging configuration using tracing.
//!
//! Every run writes its own log file; the verbosity flag mirrors the same
//! lines to stdout.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Dispatch;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::utils::errors::{ReplicateError, Result};

/// Per-run logger, created once at startup and flushed before exit.
pub struct Logger {
    dispatch: Dispatch,
    file: Arc<File>,
    path: PathBuf,
}

impl Logger {
    /// Open `<log_dir>/fixity-replicate-<timestamp>.log` and build the subscriber.
    pub fn new(log_dir: &Path, level: &str, verbose: bool) -> Result<Self> {
        let path = log_dir.join(format!(
            "fixity-replicate-{}.log",
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
        ));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ReplicateError::io(&path, e))?;
        let file = Arc::new(file);

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Arc::clone(&file));
        let stdout_layer = if verbose {
            Some(tracing_subscriber::fmt::layer())
        } else {
            None
        };

        let subscriber = Registry::default()
            .with(filter)
            .with(file_layer)
            .with(stdout_layer);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            file,
            path,
        })
    }

    /// Install this logger as the process-wide subscriber.
    pub fn install(&self) -> anyhow::Result<()> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())?;
        Ok(())
    }

    /// Subscriber handle, for scoping the logger to a single call.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) {
        let _ = (&*self.file).flush();
        let _ = self.file.sync_data();
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.flush();
    }
}
