//! Snapshot Reader Tests
//!
//! Tests for decoding RDB snapshot files and the read-through lookups used
//! by GET, TYPE and KEYS.

use std::fs;

use tempfile::TempDir;
use tidekv::snapshot::{self, SnapshotEntry, SnapshotSource};
use tidekv::store::now_ms;
use tidekv::TideError;

// =============================================================================
// Helper Functions
// =============================================================================

/// Builds snapshot files byte by byte
struct SnapshotBuilder {
    bytes: Vec<u8>,
}

impl SnapshotBuilder {
    fn new() -> Self {
        let mut bytes = b"REDIS0011".to_vec();
        bytes.push(0xFA);
        push_string(&mut bytes, "redis-ver");
        push_string(&mut bytes, "7.2.0");
        bytes.extend([0xFE, 0x00, 0xFB, 0x03, 0x01]);
        Self { bytes }
    }

    fn string(mut self, key: &str, value: &str) -> Self {
        self.bytes.push(0x00);
        push_string(&mut self.bytes, key);
        push_string(&mut self.bytes, value);
        self
    }

    fn string_expiring_ms(mut self, key: &str, value: &str, at_ms: u64) -> Self {
        self.bytes.push(0xFC);
        self.bytes.extend(at_ms.to_le_bytes());
        self.string(key, value)
    }

    fn string_expiring_secs(mut self, key: &str, value: &str, at_secs: u32) -> Self {
        self.bytes.push(0xFD);
        self.bytes.extend(at_secs.to_le_bytes());
        self.string(key, value)
    }

    fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.bytes.push(0xFF);
        self.bytes.extend([0u8; 8]);
        self.bytes
    }
}

fn push_string(out: &mut Vec<u8>, text: &str) {
    assert!(text.len() < 64);
    out.push(text.len() as u8);
    out.extend_from_slice(text.as_bytes());
}

fn write_snapshot(bytes: &[u8]) -> (TempDir, SnapshotSource) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("dump.rdb");
    fs::write(&path, bytes).unwrap();
    (temp_dir, SnapshotSource::new(path))
}

// =============================================================================
// Decoding Tests
// =============================================================================

#[test]
fn test_empty_snapshot_has_no_entries() {
    let payload = snapshot::empty_snapshot().unwrap();

    assert_eq!(payload.len(), 88);
    assert_eq!(&payload[..9], b"REDIS0011");
    assert!(snapshot::read_entries(&payload[..]).unwrap().is_empty());
}

#[test]
fn test_read_plain_strings() {
    let bytes = SnapshotBuilder::new()
        .string("foo", "bar")
        .string("baz", "qux")
        .finish();

    let entries = snapshot::read_entries(&bytes[..]).unwrap();
    assert_eq!(
        entries,
        vec![
            SnapshotEntry {
                key: "foo".to_string(),
                value: "bar".to_string(),
                expires_at_ms: 0,
            },
            SnapshotEntry {
                key: "baz".to_string(),
                value: "qux".to_string(),
                expires_at_ms: 0,
            },
        ]
    );
}

#[test]
fn test_read_expiries() {
    let bytes = SnapshotBuilder::new()
        .string_expiring_ms("ms", "1", 1_956_528_000_000)
        .string_expiring_secs("secs", "2", 1_956_528_000)
        .string("plain", "3")
        .finish();

    let entries = snapshot::read_entries(&bytes[..]).unwrap();
    assert_eq!(entries[0].expires_at_ms, 1_956_528_000_000);
    assert_eq!(entries[1].expires_at_ms, 1_956_528_000_000);
    // an expiry applies to the next key only
    assert_eq!(entries[2].expires_at_ms, 0);
}

#[test]
fn test_read_integer_encoded_values() {
    // 0xC0 int8, 0xC1 int16 LE, 0xC2 int32 LE
    let bytes = SnapshotBuilder::new()
        .raw(&[0x00, 0x01, b'a', 0xC0, 0x7B])
        .raw(&[0x00, 0x01, b'b', 0xC1, 0x39, 0x30])
        .raw(&[0x00, 0x01, b'c', 0xC2, 0x87, 0xD6, 0x12, 0x00])
        .finish();

    let values: Vec<String> = snapshot::read_entries(&bytes[..])
        .unwrap()
        .into_iter()
        .map(|entry| entry.value)
        .collect();
    assert_eq!(values, vec!["123", "12345", "1234567"]);
}

#[test]
fn test_read_fourteen_bit_length() {
    let value = "x".repeat(100);
    let mut raw = vec![0x00, 0x01, b'k', 0x40, 100];
    raw.extend_from_slice(value.as_bytes());
    let bytes = SnapshotBuilder::new().raw(&raw).finish();

    let entries = snapshot::read_entries(&bytes[..]).unwrap();
    assert_eq!(entries[0].value, value);
}

#[test]
fn test_bad_magic_is_rejected() {
    let err = snapshot::read_entries(&b"NOTREDIS1\xFF"[..]).unwrap_err();
    assert!(matches!(err, TideError::Snapshot(_)));
}

#[test]
fn test_truncated_snapshot_is_rejected() {
    let mut bytes = SnapshotBuilder::new().string("foo", "bar").finish();
    bytes.truncate(bytes.len() - 12);

    let err = snapshot::read_entries(&bytes[..]).unwrap_err();
    assert!(matches!(err, TideError::Snapshot(_)));
}

#[test]
fn test_unsupported_value_type_is_rejected() {
    // 0x01 is a list
    let bytes = SnapshotBuilder::new().raw(&[0x01, 0x01, b'l']).finish();
    assert!(matches!(
        snapshot::read_entries(&bytes[..]),
        Err(TideError::Snapshot(_))
    ));
}

#[test]
fn test_huge_declared_length_is_rejected() {
    // 0x81: 64-bit big-endian length, far beyond the bytes that follow
    let mut bytes = b"REDIS0011".to_vec();
    bytes.extend([0x00, 0x81]);
    bytes.extend(0x7FFF_FFFF_FFFF_FFFFu64.to_be_bytes());
    bytes.extend_from_slice(b"key");

    assert!(matches!(
        snapshot::read_entries(&bytes[..]),
        Err(TideError::Snapshot(_))
    ));
}

#[test]
fn test_corrupt_file_fails_lookup_without_aborting() {
    let mut bytes = b"REDIS0011".to_vec();
    bytes.extend([0x00, 0x81]);
    bytes.extend(u64::MAX.to_be_bytes());
    let (_temp, source) = write_snapshot(&bytes);

    assert!(matches!(source.lookup("key", now_ms()), Err(TideError::Snapshot(_))));
}

// =============================================================================
// File Lookup Tests
// =============================================================================

#[test]
fn test_missing_file_reads_as_empty() {
    let temp_dir = TempDir::new().unwrap();
    let source = SnapshotSource::new(temp_dir.path().join("absent.rdb"));

    assert_eq!(source.lookup("foo", now_ms()).unwrap(), None);
    assert!(source.keys(now_ms()).unwrap().is_empty());
}

#[test]
fn test_lookup_skips_expired_entries() {
    let bytes = SnapshotBuilder::new()
        .string("fresh", "1")
        .string_expiring_ms("stale", "2", 1_000)
        .finish();
    let (_temp, source) = write_snapshot(&bytes);

    let fresh = source.lookup("fresh", now_ms()).unwrap().unwrap();
    assert_eq!(fresh.value, "1");
    assert_eq!(source.lookup("stale", now_ms()).unwrap(), None);
    assert_eq!(source.keys(now_ms()).unwrap(), vec!["fresh".to_string()]);
}

#[test]
fn test_file_path_joins_dir_and_filename() {
    let config = tidekv::Config::builder()
        .snapshot_dir("/var/lib/tidekv")
        .snapshot_filename("snap.rdb")
        .build();
    assert_eq!(
        snapshot::file_path(&config),
        std::path::PathBuf::from("/var/lib/tidekv/snap.rdb")
    );
}
