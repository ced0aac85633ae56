//! Streaming MD5 fixity digests.
//!
//! MD5 is what legacy collection manifests record, so that is what we compute.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size; memory use stays flat regardless of file size.
pub const CHUNK_SIZE: usize = 4 * 1024;

/// A file's fixity value: lowercase hex plus the raw 16 digest bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDigest {
    pub hex: String,
    #[serde(skip)]
    pub raw: [u8; 16],
}

impl FileDigest {
    pub fn from_raw(raw: [u8; 16]) -> Self {
        Self {
            hex: hex::encode(raw),
            raw,
        }
    }

    /// Base64 of the raw digest, the form `Content-MD5` expects.
    pub fn base64(&self) -> String {
        STANDARD.encode(self.raw)
    }
}

/// Digest everything readable from `reader` in fixed-size chunks.
pub fn md5_reader<R: Read>(mut reader: R) -> io::Result<FileDigest> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(finish(hasher))
}

fn finish(hasher: Md5) -> FileDigest {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&hasher.finalize());
    FileDigest::from_raw(raw)
}

pub fn md5_file(path: &Path) -> io::Result<FileDigest> {
    md5_reader(File::open(path)?)
}

pub fn md5_bytes(data: &[u8]) -> FileDigest {
    let mut hasher = Md5::new();
    hasher.update(data);
    finish(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_digest() -> io::Result<()> {
        let file = NamedTempFile::new()?;
        let digest = md5_file(file.path())?;
        assert_eq!(digest.hex, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(digest.base64(), "1B2M2Y8AsgTpgAmY7PhCfg==");
        Ok(())
    }

    #[test]
    fn test_multi_chunk_file_matches_one_shot() -> io::Result<()> {
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new()?;
        file.write_all(&data)?;
        file.flush()?;

        assert_eq!(md5_file(file.path())?, md5_bytes(&data));
        Ok(())
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            md5_bytes(b"The quick brown fox jumps over the lazy dog").hex,
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(md5_file(Path::new("/nonexistent/fixity/file")).is_err());
    }
}
