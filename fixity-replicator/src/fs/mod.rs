//! File system operations for fixity scanning.

pub mod checksum;
pub mod ignore;
pub mod walker;

pub use checksum::FileDigest;
pub use ignore::IgnoreSet;
pub use walker::{scan_directory, scan_directory_with_workers, FilesystemMap, ScanReport};
