//! Snapshot Module
//!
//! Read-only access to RDB snapshot files. The live store consults it as a
//! fallback on GET/TYPE/KEYS misses, and a replica loads the payload it
//! receives during a full resync.
//!
//! ## File Format (subset)
//! ```text
//! ┌───────────────┬──────────────────────────────┬─────┬──────────────┐
//! │ "REDIS0011"   │ 0xFA aux* │ 0xFE db 0xFB ... │0xFF │ checksum (8) │
//! └───────────────┴──────────────────────────────┴─────┴──────────────┘
//! key/value: [0xFC ms (8, LE) | 0xFD secs (4, LE)] 0x00 <key> <value>
//! ```

mod reader;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::Config;
use crate::error::{Result, TideError};

pub use reader::SnapshotReader;

/// Empty snapshot sent to replicas on FULLRESYNC
pub const EMPTY_SNAPSHOT_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

/// One key decoded from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,

    /// Absolute expiry in unix milliseconds; 0 means no expiry
    pub expires_at_ms: u64,
}

impl SnapshotEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }
}

/// Snapshot location derived from the configuration
pub fn file_path(config: &Config) -> PathBuf {
    config.snapshot_dir.join(&config.snapshot_filename)
}

/// Decode the embedded empty snapshot
pub fn empty_snapshot() -> Result<Bytes> {
    hex::decode(EMPTY_SNAPSHOT_HEX)
        .map(Bytes::from)
        .map_err(|e| TideError::Snapshot(format!("invalid embedded snapshot: {}", e)))
}

/// Read every key from the snapshot at `path`
///
/// A missing file yields no entries.
pub fn read_all_entries(path: &Path) -> Result<Vec<SnapshotEntry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    read_entries(BufReader::new(file))
}

/// Read every key from an in-memory snapshot payload
pub fn read_entries<R: std::io::Read>(reader: R) -> Result<Vec<SnapshotEntry>> {
    SnapshotReader::new(reader).read_all()
}

/// Read-through lookups against the configured snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unexpired entry for `key`, if the snapshot has one
    pub fn lookup(&self, key: &str, now_ms: u64) -> Result<Option<SnapshotEntry>> {
        Ok(read_all_entries(&self.path)?
            .into_iter()
            .find(|entry| entry.key == key && !entry.is_expired(now_ms)))
    }

    /// Every unexpired key in the snapshot
    pub fn keys(&self, now_ms: u64) -> Result<Vec<String>> {
        Ok(read_all_entries(&self.path)?
            .into_iter()
            .filter(|entry| !entry.is_expired(now_ms))
            .map(|entry| entry.key)
            .collect())
    }
}
