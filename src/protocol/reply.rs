//! Reply definitions
//!
//! Represents replies sent to clients, with encoding to RESP and decoding
//! from a buffered stream (used by the client and the replica handshake).

use std::io::{BufRead, Read, Write};

use bytes::Bytes;

use crate::error::{Result, TideError};
use super::{MAX_ARRAY_LEN, MAX_BULK_LEN};

/// Line terminator used by every RESP element
pub const CRLF: &[u8] = b"\r\n";

/// A reply to send to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+text\r\n`
    Simple(String),

    /// `$len\r\nbytes\r\n`
    Bulk(Bytes),

    /// `$-1\r\n`
    Null,

    /// `*-1\r\n`
    NullArray,

    /// `:value\r\n`
    Integer(i64),

    /// `*count\r\n` followed by the encoded elements
    Array(Vec<Reply>),

    /// `-text\r\n`; text carries its own code (`ERR`, `WRONGTYPE`, ...)
    Error(String),

    /// `$len\r\nbytes` with no trailing terminator (snapshot transfer)
    Snapshot(Bytes),
}

impl Reply {
    /// `+OK`
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    /// Simple string reply
    pub fn simple(text: impl Into<String>) -> Self {
        Reply::Simple(text.into())
    }

    /// Bulk string reply
    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Reply::Bulk(value.into())
    }

    /// Bulk string reply from text
    pub fn bulk_str(value: &str) -> Self {
        Reply::Bulk(Bytes::copy_from_slice(value.as_bytes()))
    }

    /// Array of bulk strings
    pub fn bulk_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Reply::Array(items.into_iter().map(|s| Reply::bulk_str(s.as_ref())).collect())
    }

    /// Error reply built from a command error
    pub fn from_error(error: &TideError) -> Self {
        Reply::Error(format!("{} {}", error.reply_code(), error))
    }

    /// Error reply with the generic `ERR` code
    pub fn error(message: impl AsRef<str>) -> Self {
        Reply::Error(format!("ERR {}", message.as_ref()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Text content of a simple or bulk string
    pub fn as_text(&self) -> Option<String> {
        match self {
            Reply::Simple(text) | Reply::Error(text) => Some(text.clone()),
            Reply::Bulk(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Append the encoded reply to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(text) => {
                out.push(b'+');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Reply::Bulk(bytes) => {
                out.push(b'$');
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                out.extend_from_slice(bytes);
                out.extend_from_slice(CRLF);
            }
            Reply::Null => out.extend_from_slice(b"$-1\r\n"),
            Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::Integer(value) => {
                out.push(b':');
                out.extend_from_slice(value.to_string().as_bytes());
                out.extend_from_slice(CRLF);
            }
            Reply::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                for item in items {
                    item.encode_into(out);
                }
            }
            Reply::Error(text) => {
                out.push(b'-');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Reply::Snapshot(bytes) => {
                out.push(b'$');
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                out.extend_from_slice(bytes);
            }
        }
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Encode a command as a RESP array of bulk strings
pub fn encode_command<S: AsRef<str>>(parts: &[S]) -> Vec<u8> {
    let reply = Reply::Array(parts.iter().map(|p| Reply::bulk_str(p.as_ref())).collect());
    reply.encode()
}

/// Write a reply to a stream and flush it
pub fn write_reply<W: Write>(writer: &mut W, reply: &Reply) -> Result<()> {
    writer.write_all(&reply.encode())?;
    writer.flush()?;
    Ok(())
}

/// Read one complete reply from a buffered stream
///
/// Blocks until the reply is complete. `Reply::Snapshot` is never produced
/// here; the replica handshake reads the snapshot payload itself.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply> {
    let line = read_line(reader)?;
    let Some(body) = line.get(1..) else {
        return Err(TideError::Protocol(format!("unexpected reply line '{}'", line)));
    };

    match line.as_bytes()[0] {
        b'+' => Ok(Reply::Simple(body.to_string())),
        b'-' => Ok(Reply::Error(body.to_string())),
        b':' => body
            .parse::<i64>()
            .map(Reply::Integer)
            .map_err(|_| TideError::Protocol(format!("invalid integer reply '{}'", body))),
        b'$' => {
            let len = parse_length(body)?;
            let Some(len) = len else {
                return Ok(Reply::Null);
            };
            if len > MAX_BULK_LEN {
                return Err(TideError::Protocol(format!(
                    "bulk length {} exceeds maximum {}",
                    len, MAX_BULK_LEN
                )));
            }
            let mut payload = vec![0u8; len + CRLF.len()];
            reader.read_exact(&mut payload)?;
            if &payload[len..] != CRLF {
                return Err(TideError::Protocol(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            payload.truncate(len);
            Ok(Reply::Bulk(Bytes::from(payload)))
        }
        b'*' => {
            let Some(count) = parse_length(body)? else {
                return Ok(Reply::NullArray);
            };
            if count > MAX_ARRAY_LEN {
                return Err(TideError::Protocol(format!(
                    "array length {} exceeds maximum {}",
                    count, MAX_ARRAY_LEN
                )));
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_reply(reader)?);
            }
            Ok(Reply::Array(items))
        }
        other => Err(TideError::Protocol(format!(
            "unexpected reply type '{}'",
            other as char
        ))),
    }
}

/// Read one CRLF-terminated line, without the terminator
pub fn read_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line)?;
    if read == 0 {
        return Err(TideError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed while reading a reply",
        )));
    }
    if !line.ends_with(CRLF) {
        return Err(TideError::Protocol("reply line not terminated by CRLF".to_string()));
    }
    line.truncate(line.len() - CRLF.len());
    if line.is_empty() {
        return Err(TideError::Protocol("empty reply line".to_string()));
    }
    String::from_utf8(line).map_err(|_| TideError::Protocol("reply line is not UTF-8".to_string()))
}

/// Parse a length header; `-1` means null
fn parse_length(body: &str) -> Result<Option<usize>> {
    if body == "-1" {
        return Ok(None);
    }
    body.parse::<usize>()
        .map(Some)
        .map_err(|_| TideError::Protocol(format!("invalid length '{}'", body)))
}
