//! Checksum manifest reader.
//!
//! A manifest is plain text with one `<md5><separator><relative path>` record
//! per line. Later records for the same path replace earlier ones.

use crate::fs::ignore::IgnoreSet;
use crate::utils::errors::{ReplicateError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// Relative path to lowercase hex checksum.
pub type ManifestMap = HashMap<String, String>;

pub const DEFAULT_MANIFEST_NAME: &str = "checksum-md5.txt";
pub const DEFAULT_SEPARATOR: &str = ",";

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub entries: ManifestMap,
    /// Every line read from the file, blank ones included
    pub lines_read: usize,
    /// Non-blank lines parsed as records
    pub records: usize,
    /// Records left after ignore filtering
    pub retained: usize,
}

/// Trim whitespace, drop a leading `./` and use forward slashes.
pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    trimmed.replace('\\', "/")
}

/// Parse the manifest at `path`.
///
/// A line that is not valid UTF-8 aborts the whole read, as does a line that
/// does not split into exactly two fields.
pub fn read_manifest(path: &Path, separator: &str, ignore: &IgnoreSet) -> Result<Manifest> {
    let file = File::open(path).map_err(|e| ReplicateError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut manifest = Manifest::default();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| ReplicateError::io(path, e))?;
        if n == 0 {
            break;
        }
        line_no += 1;

        let mut line = std::str::from_utf8(&buf).map_err(|_| ReplicateError::Encoding {
            path: path.to_path_buf(),
            line: line_no,
        })?;
        if line_no == 1 {
            line = line.strip_prefix('\u{feff}').unwrap_or(line);
        }
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        manifest.records += 1;

        let fields: Vec<&str> = line.split(separator).collect();
        let [checksum, rel_path] = fields[..] else {
            return Err(ReplicateError::Format {
                path: path.to_path_buf(),
                line: line_no,
                fields: fields.len(),
                content: line.to_string(),
            });
        };

        let rel_path = normalize_path(rel_path);
        if ignore.is_ignored(&rel_path) {
            continue;
        }

        let checksum = checksum.trim().to_ascii_lowercase();
        if let Some(previous) = manifest.entries.insert(rel_path.clone(), checksum) {
            debug!(path = %rel_path, previous = %previous, "duplicate manifest entry replaced");
        }
    }

    manifest.lines_read = line_no;
    manifest.retained = manifest.entries.len();
    info!(
        lines_read = manifest.lines_read,
        records = manifest.records,
        retained = manifest.retained,
        "Read manifest {}",
        path.display()
    );

    Ok(manifest)
}
