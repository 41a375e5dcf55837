//! Incremental command framer
//!
//! Turns a byte stream into discrete commands, no matter how the bytes of a
//! command are split across socket reads.
//!
//! ## States
//! ```text
//!            '*N' line                '$L' line
//!   Idle ─────────────────▶ AwaitingElementLength ─────────▶ AwaitingElementValue
//!    │                             ▲                                │
//!    │ inline line                 └──────── more elements ─────────┤
//!    ▼                                                              │ N elements read
//!  Complete ◀───────────────────────────────────────────────────────┘
//! ```
//!
//! A buffer that already holds the whole array is parsed in one pass (fast
//! path). Any malformed input moves the framer to `Failed`; it then rejects
//! input until `reset()` is called.
//!
//! An unknown command name is not a framing failure. The whole command is
//! consumed first, then `UnknownCommand` is returned with the framer back in
//! `Idle`, so bytes pipelined after it are still parsed.

use bytes::{Buf, BytesMut};

use crate::error::{Result, TideError};
use super::{CommandName, ParsedCommand};

/// Largest accepted bulk string (512 MB)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest accepted number of array elements
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Longest header or inline line accepted before a terminator shows up
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Framer state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    /// No command in progress
    Idle,
    /// Waiting for the `$len` line of the next element
    AwaitingElementLength,
    /// Waiting for the bytes of the current element
    AwaitingElementValue,
    /// A command is ready to be taken
    Complete,
    /// A protocol error occurred; `reset()` is required
    Failed,
}

/// Incremental RESP parser owned by one connection
#[derive(Debug)]
pub struct Framer {
    /// Bytes received but not yet handed out as a command
    buffer: BytesMut,

    /// Bytes of `buffer` already consumed by the command in progress
    cursor: usize,

    state: FramerState,

    /// Element count from the `*N` header
    declared: usize,

    /// Byte length of the element being read
    element_len: usize,

    /// First element of the array, resolved once the array is complete
    name: Option<String>,
    args: Vec<String>,
    ready: Option<ParsedCommand>,
}

impl Framer {
    /// Create a framer in the `Idle` state
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            cursor: 0,
            state: FramerState::Idle,
            declared: 0,
            element_len: 0,
            name: None,
            args: Vec::new(),
            ready: None,
        }
    }

    /// Current state
    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Number of buffered bytes not yet returned as part of a command
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append `bytes` and advance as far as the buffer allows
    ///
    /// Returns `Ok(true)` once a command is ready to be taken. Feeding an
    /// empty slice re-examines bytes left over after the previous command.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<bool> {
        if self.state == FramerState::Failed {
            return Err(TideError::Protocol(
                "framer must be reset after a protocol error".to_string(),
            ));
        }

        self.buffer.extend_from_slice(bytes);

        match self.advance() {
            Ok(ready) => Ok(ready),
            Err(e) => {
                if e.is_protocol() {
                    self.state = FramerState::Failed;
                }
                Err(e)
            }
        }
    }

    /// Take the completed command, returning the framer to `Idle`
    ///
    /// Bytes that arrived after the command stay buffered.
    pub fn take_command(&mut self) -> Option<ParsedCommand> {
        if self.state != FramerState::Complete {
            return None;
        }
        self.state = FramerState::Idle;
        self.ready.take()
    }

    /// Return to the initial state, discarding everything buffered
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.state = FramerState::Idle;
        self.declared = 0;
        self.element_len = 0;
        self.name = None;
        self.args.clear();
        self.ready = None;
    }

    fn advance(&mut self) -> Result<bool> {
        loop {
            match self.state {
                FramerState::Complete => return Ok(true),
                FramerState::Failed => {
                    return Err(TideError::Protocol("framer is in a failed state".to_string()))
                }
                FramerState::Idle => {
                    let Some(first) = self.buffer.first().copied() else {
                        return Ok(false);
                    };

                    if first != b'*' {
                        let Some((content_end, next)) = self.line_at(0)? else {
                            return Ok(false);
                        };
                        if self.buffer[..content_end].iter().all(u8::is_ascii_whitespace) {
                            self.buffer.advance(next);
                            continue;
                        }
                        return self.parse_inline(content_end, next);
                    }

                    if let Some((token, args, consumed)) = parse_whole_array(&self.buffer)? {
                        self.cursor = consumed;
                        return self.complete(&token, args);
                    }

                    let Some((content_end, next)) = self.line_at(self.cursor)? else {
                        return Ok(false);
                    };
                    self.declared = parse_array_header(&self.buffer[..content_end])?;
                    self.cursor = next;
                    self.state = FramerState::AwaitingElementLength;
                }
                FramerState::AwaitingElementLength => {
                    let Some((content_end, next)) = self.line_at(self.cursor)? else {
                        return Ok(false);
                    };
                    self.element_len = parse_bulk_header(&self.buffer[self.cursor..content_end])?;
                    self.cursor = next;
                    self.state = FramerState::AwaitingElementValue;
                }
                FramerState::AwaitingElementValue => {
                    let value_end = self.cursor + self.element_len;
                    let Some(value) = read_bulk_value(&self.buffer, self.cursor, self.element_len)?
                    else {
                        return Ok(false);
                    };
                    self.cursor = value_end + 2;

                    if self.name.is_none() {
                        self.name = Some(value);
                    } else {
                        self.args.push(value);
                    }

                    if self.args.len() + 1 == self.declared {
                        let token = self.name.take().ok_or_else(|| {
                            TideError::Protocol("array completed without a command name".to_string())
                        })?;
                        let args = std::mem::take(&mut self.args);
                        return self.complete(&token, args);
                    }
                    self.state = FramerState::AwaitingElementLength;
                }
            }
        }
    }

    /// Parse a plain `COMMAND arg arg` line
    fn parse_inline(&mut self, content_end: usize, next: usize) -> Result<bool> {
        let line = String::from_utf8_lossy(&self.buffer[..content_end]).into_owned();
        let mut tokens = line.split_ascii_whitespace();
        let command = tokens.next().unwrap_or_default();
        let args = tokens.map(str::to_string).collect();

        self.cursor = next;
        self.complete(command, args)
    }

    /// Resolve the command name of a fully consumed command
    fn complete(&mut self, token: &str, args: Vec<String>) -> Result<bool> {
        match CommandName::parse(token) {
            Some(name) => {
                self.finish(name, args);
                Ok(true)
            }
            None => {
                self.discard();
                Err(TideError::UnknownCommand(token.to_string()))
            }
        }
    }

    /// Locate the line starting at `from`, enforcing `MAX_LINE_LEN`
    fn line_at(&self, from: usize) -> Result<Option<(usize, usize)>> {
        match find_line(&self.buffer, from) {
            Some(found) => Ok(Some(found)),
            None if self.buffer.len() - from > MAX_LINE_LEN => Err(TideError::Protocol(
                "line exceeds maximum length".to_string(),
            )),
            None => Ok(None),
        }
    }

    fn finish(&mut self, name: CommandName, args: Vec<String>) {
        let raw = self.buffer.split_to(self.cursor).freeze();
        self.cursor = 0;
        self.declared = 0;
        self.element_len = 0;
        self.ready = Some(ParsedCommand { raw, name, args });
        self.state = FramerState::Complete;
    }

    /// Drop the consumed command bytes, keeping anything pipelined after them
    fn discard(&mut self) {
        self.buffer.advance(self.cursor);
        self.cursor = 0;
        self.declared = 0;
        self.element_len = 0;
        self.name = None;
        self.args.clear();
        self.state = FramerState::Idle;
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

/// Fast path: parse an array that is entirely present in `buf`
///
/// Returns `Ok(None)` when the array is incomplete. The command name is
/// returned unresolved.
fn parse_whole_array(buf: &[u8]) -> Result<Option<(String, Vec<String>, usize)>> {
    let Some((content_end, mut cursor)) = find_line(buf, 0) else {
        return Ok(None);
    };
    let declared = parse_array_header(&buf[..content_end])?;

    let mut name = None;
    let mut args = Vec::with_capacity(declared.saturating_sub(1));

    for _ in 0..declared {
        let Some((content_end, next)) = find_line(buf, cursor) else {
            return Ok(None);
        };
        let len = parse_bulk_header(&buf[cursor..content_end])?;
        let Some(value) = read_bulk_value(buf, next, len)? else {
            return Ok(None);
        };
        cursor = next + len + 2;

        if name.is_none() {
            name = Some(value);
        } else {
            args.push(value);
        }
    }

    match name {
        Some(name) => Ok(Some((name, args, cursor))),
        None => Err(TideError::Protocol("empty command array".to_string())),
    }
}

/// Find the line starting at `from`: (end of content, start of next line)
fn find_line(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let newline = buf.get(from..)?.iter().position(|&b| b == b'\n')? + from;
    let content_end = if newline > from && buf[newline - 1] == b'\r' {
        newline - 1
    } else {
        newline
    };
    Some((content_end, newline + 1))
}

/// Parse `*N`, rejecting empty or oversized arrays
fn parse_array_header(line: &[u8]) -> Result<usize> {
    let declared = parse_prefixed_len(line, b'*')?;
    if declared == 0 {
        return Err(TideError::Protocol("empty command array".to_string()));
    }
    if declared > MAX_ARRAY_LEN {
        return Err(TideError::Protocol(format!(
            "array length {} exceeds maximum {}",
            declared, MAX_ARRAY_LEN
        )));
    }
    Ok(declared)
}

/// Parse `$L`, rejecting oversized strings
fn parse_bulk_header(line: &[u8]) -> Result<usize> {
    let len = parse_prefixed_len(line, b'$')?;
    if len > MAX_BULK_LEN {
        return Err(TideError::Protocol(format!(
            "bulk length {} exceeds maximum {}",
            len, MAX_BULK_LEN
        )));
    }
    Ok(len)
}

fn parse_prefixed_len(line: &[u8], prefix: u8) -> Result<usize> {
    let invalid = || {
        TideError::Protocol(format!(
            "expected '{}' length line, got '{}'",
            prefix as char,
            String::from_utf8_lossy(line)
        ))
    };

    match line.split_first() {
        Some((&first, digits)) if first == prefix => std::str::from_utf8(digits)
            .ok()
            .and_then(|d| d.parse::<usize>().ok())
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Read `len` bytes at `start` followed by CRLF; `Ok(None)` if not buffered yet
fn read_bulk_value(buf: &[u8], start: usize, len: usize) -> Result<Option<String>> {
    let value_end = start + len;
    if buf.len() < value_end + 2 {
        return Ok(None);
    }
    if &buf[value_end..value_end + 2] != b"\r\n" {
        return Err(TideError::Protocol(format!(
            "bulk string longer than declared length {}",
            len
        )));
    }
    Ok(Some(String::from_utf8_lossy(&buf[start..value_end]).into_owned()))
}
