//! Human-readable transfer figures for run summaries.

use std::time::{Duration, Instant};

/// Wall-clock throughput of one replication pass.
#[derive(Debug, Clone, Copy)]
pub struct Throughput {
    started: Instant,
}

impl Throughput {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// e.g. `12.00 MB in 1m 4s (192.00 KB/s)`
    pub fn summary(&self, bytes: u64) -> String {
        let elapsed = self.elapsed();
        format!(
            "{} in {} ({})",
            format_bytes(bytes),
            format_duration(elapsed.as_secs()),
            format_speed(bytes_per_second(bytes, elapsed))
        )
    }
}

fn bytes_per_second(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
