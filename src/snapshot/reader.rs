//! Snapshot Reader
//!
//! Decodes string keys (with optional expiry) from an RDB stream.

use std::io::Read;

use crate::error::{Result, TideError};
use super::SnapshotEntry;

/// Magic bytes at the start of every snapshot
pub const MAGIC: &[u8; 5] = b"REDIS";

const OP_AUX: u8 = 0xFA;
const OP_RESIZE_DB: u8 = 0xFB;
const OP_EXPIRE_MS: u8 = 0xFC;
const OP_EXPIRE_SECS: u8 = 0xFD;
const OP_SELECT_DB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;
const TYPE_STRING: u8 = 0x00;

/// Decoded length prefix
enum Encoding {
    Length(u64),
    Int8,
    Int16,
    Int32,
    Compressed,
}

/// Streaming snapshot decoder
pub struct SnapshotReader<R> {
    reader: R,
}

impl<R: Read> SnapshotReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Decode every string entry up to the end-of-file marker
    pub fn read_all(mut self) -> Result<Vec<SnapshotEntry>> {
        self.read_header()?;

        let mut entries = Vec::new();
        let mut expires_at_ms = 0;

        loop {
            match self.read_u8()? {
                OP_AUX => {
                    self.read_string()?;
                    self.read_string()?;
                }
                OP_SELECT_DB => {
                    self.read_length()?;
                }
                OP_RESIZE_DB => {
                    self.read_length()?;
                    self.read_length()?;
                }
                OP_EXPIRE_SECS => {
                    let mut buf = [0u8; 4];
                    self.read_exact(&mut buf)?;
                    expires_at_ms = u64::from(u32::from_le_bytes(buf)) * 1000;
                }
                OP_EXPIRE_MS => {
                    let mut buf = [0u8; 8];
                    self.read_exact(&mut buf)?;
                    expires_at_ms = u64::from_le_bytes(buf);
                }
                TYPE_STRING => {
                    let key = self.read_string()?;
                    let value = self.read_string()?;
                    entries.push(SnapshotEntry {
                        key,
                        value,
                        expires_at_ms,
                    });
                    expires_at_ms = 0;
                }
                OP_EOF => break,
                other => {
                    return Err(TideError::Snapshot(format!(
                        "unsupported value type 0x{:02x}",
                        other
                    )))
                }
            }
        }

        Ok(entries)
    }

    fn read_header(&mut self) -> Result<()> {
        let mut header = [0u8; 9];
        self.read_exact(&mut header)?;
        if &header[..5] != MAGIC {
            return Err(TideError::Snapshot("missing REDIS magic header".to_string()));
        }
        if !header[5..].iter().all(u8::is_ascii_digit) {
            return Err(TideError::Snapshot("invalid snapshot version".to_string()));
        }
        Ok(())
    }

    fn read_encoding(&mut self) -> Result<Encoding> {
        let first = self.read_u8()?;
        match first >> 6 {
            0b00 => Ok(Encoding::Length(u64::from(first & 0x3F))),
            0b01 => {
                let second = self.read_u8()?;
                Ok(Encoding::Length((u64::from(first & 0x3F) << 8) | u64::from(second)))
            }
            0b10 => match first {
                0x80 => {
                    let mut buf = [0u8; 4];
                    self.read_exact(&mut buf)?;
                    Ok(Encoding::Length(u64::from(u32::from_be_bytes(buf))))
                }
                0x81 => {
                    let mut buf = [0u8; 8];
                    self.read_exact(&mut buf)?;
                    Ok(Encoding::Length(u64::from_be_bytes(buf)))
                }
                _ => Err(TideError::Snapshot(format!(
                    "invalid length prefix 0x{:02x}",
                    first
                ))),
            },
            _ => match first & 0x3F {
                0 => Ok(Encoding::Int8),
                1 => Ok(Encoding::Int16),
                2 => Ok(Encoding::Int32),
                3 => Ok(Encoding::Compressed),
                _ => Err(TideError::Snapshot(format!(
                    "invalid string encoding 0x{:02x}",
                    first
                ))),
            },
        }
    }

    fn read_length(&mut self) -> Result<u64> {
        match self.read_encoding()? {
            Encoding::Length(len) => Ok(len),
            _ => Err(TideError::Snapshot("expected a plain length".to_string())),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        match self.read_encoding()? {
            Encoding::Length(len) => {
                // grows with the bytes actually present, not the declared length
                let mut buf = Vec::new();
                (&mut self.reader).take(len).read_to_end(&mut buf)?;
                if buf.len() as u64 != len {
                    return Err(TideError::Snapshot(format!(
                        "string of {} bytes truncated after {}",
                        len,
                        buf.len()
                    )));
                }
                Ok(String::from_utf8_lossy(&buf).into_owned())
            }
            Encoding::Int8 => {
                let mut buf = [0u8; 1];
                self.read_exact(&mut buf)?;
                Ok(i8::from_le_bytes(buf).to_string())
            }
            Encoding::Int16 => {
                let mut buf = [0u8; 2];
                self.read_exact(&mut buf)?;
                Ok(i16::from_le_bytes(buf).to_string())
            }
            Encoding::Int32 => {
                let mut buf = [0u8; 4];
                self.read_exact(&mut buf)?;
                Ok(i32::from_le_bytes(buf).to_string())
            }
            Encoding::Compressed => Err(TideError::Snapshot(
                "compressed strings are not supported".to_string(),
            )),
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                TideError::Snapshot("snapshot ended unexpectedly".to_string())
            }
            _ => TideError::Io(e),
        })
    }
}
