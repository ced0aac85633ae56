//! Fixity Replicate - Main entry point
//!
//! Checks a collection against its checksum manifest, then copies it to an
//! object store.

use clap::Parser;
use fixity_replicator::{
    config::Settings, daemon::shutdown::ShutdownCoordinator, store::http::HttpObjectStore,
    utils::logger::Logger, ReplicateError, ReplicationExecutor,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Collection directory to verify and replicate
    #[arg(short, long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Manifest file name inside the directory
    #[arg(short, long, value_name = "NAME")]
    manifest: Option<String>,

    /// Directory for the run log and report
    #[arg(short = 'l', long = "logfile", value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Verify the manifest before replicating
    #[arg(short, long)]
    fixity: bool,

    /// Manifest field separator
    #[arg(short, long)]
    separator: Option<String>,

    /// Destination URI, s3://bucket/prefix
    #[arg(short, long, value_name = "URI")]
    target: Option<String>,

    /// Mirror log output to stdout
    #[arg(short, long)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Base URL of the S3-compatible gateway
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Files hashed concurrently
    #[arg(long)]
    hash_workers: Option<usize>,

    /// Files uploaded concurrently
    #[arg(long)]
    upload_workers: Option<usize>,

    /// Per-upload timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Stop starting uploads after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Skip writing the JSON run report
    #[arg(long)]
    no_report: bool,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(dir) = self.directory {
            settings.source_dir = dir;
        }
        if let Some(name) = self.manifest {
            settings.manifest_name = name;
        }
        if let Some(dir) = self.log_dir {
            settings.log_dir = dir;
        }
        if let Some(separator) = self.separator {
            settings.separator = separator;
        }
        if let Some(target) = self.target {
            settings.target = target;
        }
        if let Some(level) = self.log_level {
            settings.log_level = level;
        }
        if let Some(endpoint) = self.endpoint {
            settings.endpoint = endpoint;
        }
        if let Some(n) = self.hash_workers {
            settings.hash_workers = n;
        }
        if let Some(n) = self.upload_workers {
            settings.upload_workers = n;
        }
        if let Some(secs) = self.timeout_secs {
            settings.upload_timeout_secs = secs;
        }
        settings.fixity |= self.fixity;
        settings.verbose |= self.verbose;
        settings.fail_fast |= self.fail_fast;
        if self.no_report {
            settings.report = false;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => return fail(&e),
    };
    args.apply(&mut settings);

    let log_level = settings.log_level.clone();
    let verbose = settings.verbose;
    let config = match settings.validate() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    // Initialize logging
    let logger = match Logger::new(&config.log_dir, &log_level, verbose) {
        Ok(logger) => logger,
        Err(e) => return fail(&e),
    };
    if let Err(e) = logger.install() {
        eprintln!("Failed to install logger: {e:#}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        "Starting fixity-replicate v{} (log: {})",
        env!("CARGO_PKG_VERSION"),
        logger.path().display()
    );

    // The token only comes from the config file or FIXITY_TOKEN, never argv
    let store = match HttpObjectStore::new(
        &config.endpoint,
        config.upload.timeout,
        config.token.as_deref(),
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            logger.flush();
            return fail(&ReplicateError::from(e));
        }
    };

    // Cancel the run on SIGINT/SIGTERM
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signal_waiter = Arc::clone(&shutdown);
    let signal_handle = tokio::spawn(async move { signal_waiter.wait_for_signal().await });

    let executor = ReplicationExecutor::new(config, store).with_cancel(shutdown.token());
    let result = executor.run().await;

    signal_handle.abort();

    let code = match result {
        Ok(summary) => {
            tracing::info!(run_id = %summary.run_id, "Replication complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("fixity-replicate: {e}");
            ExitCode::from(e.exit_code())
        }
    };

    logger.flush();
    code
}

fn fail(err: &ReplicateError) -> ExitCode {
    eprintln!("fixity-replicate: {err}");
    ExitCode::from(err.exit_code())
}
