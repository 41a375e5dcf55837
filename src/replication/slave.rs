//! Replica-side replication
//!
//! Performs the handshake with the master and then applies the propagated
//! command stream, answering `REPLCONF GETACK` with the processed offset.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::ReplicaOf;
use crate::dispatch::Dispatcher;
use crate::error::{Result, TideError};
use crate::protocol::{
    encode_command, read_line, read_reply, write_reply, Framer, ParsedCommand, Reply, MAX_BULK_LEN,
};

/// Replication state of a replica
pub struct SlaveState {
    master: ReplicaOf,
    master_replication_id: RwLock<String>,

    /// Bytes of propagated commands processed so far
    offset: AtomicU64,
}

impl SlaveState {
    pub fn new(master: ReplicaOf) -> Self {
        Self {
            master,
            master_replication_id: RwLock::new("?".to_string()),
            offset: AtomicU64::new(0),
        }
    }

    pub fn master(&self) -> &ReplicaOf {
        &self.master
    }

    /// Replication id announced by the master (`?` before the handshake)
    pub fn master_replication_id(&self) -> String {
        self.master_replication_id.read().clone()
    }

    pub fn set_master_replication_id(&self, id: impl Into<String>) {
        *self.master_replication_id.write() = id.into();
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Account for a processed command of `len` bytes
    pub fn advance(&self, len: u64) -> u64 {
        self.offset.fetch_add(len, Ordering::AcqRel) + len
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// What the master sent back during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub replication_id: String,
    pub offset: u64,

    /// Raw snapshot payload
    pub snapshot: Bytes,
}

/// Run the replica handshake over an established connection
///
/// Any reply that does not match the expected one aborts with
/// `TideError::Handshake`.
pub fn handshake<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    listening_port: u16,
) -> Result<HandshakeOutcome> {
    exchange(reader, writer, &["PING"], "PONG")?;
    let port = listening_port.to_string();
    exchange(reader, writer, &["REPLCONF", "listening-port", &port], "OK")?;
    exchange(reader, writer, &["REPLCONF", "capa", "psync2"], "OK")?;

    send(writer, &["PSYNC", "?", "-1"])?;
    let reply = read_reply(reader)?;
    let (replication_id, offset) = parse_fullresync(&reply)?;
    tracing::debug!("Full resync from master {} at offset {}", replication_id, offset);

    let snapshot = read_snapshot(reader)?;
    tracing::debug!("Received {} byte snapshot", snapshot.len());

    Ok(HandshakeOutcome {
        replication_id,
        offset,
        snapshot,
    })
}

fn send<W: Write>(writer: &mut W, parts: &[&str]) -> Result<()> {
    writer.write_all(&encode_command(parts))?;
    writer.flush()?;
    Ok(())
}

fn exchange<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    parts: &[&str],
    expected: &str,
) -> Result<()> {
    send(writer, parts)?;
    match read_reply(reader)? {
        Reply::Simple(text) if text.eq_ignore_ascii_case(expected) => Ok(()),
        other => Err(TideError::Handshake(format!(
            "expected +{} in reply to {}, got {:?}",
            expected,
            parts.join(" "),
            other
        ))),
    }
}

fn parse_fullresync(reply: &Reply) -> Result<(String, u64)> {
    let Reply::Simple(text) = reply else {
        return Err(TideError::Handshake(format!(
            "expected +FULLRESYNC, got {:?}",
            reply
        )));
    };

    let mut parts = text.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(id), Some(offset)) if tag.eq_ignore_ascii_case("FULLRESYNC") => {
            let offset = offset
                .parse()
                .map_err(|_| TideError::Handshake(format!("invalid resync offset '{}'", offset)))?;
            Ok((id.to_string(), offset))
        }
        _ => Err(TideError::Handshake(format!("expected +FULLRESYNC, got +{}", text))),
    }
}

/// Read `$<len>\r\n<len bytes>` (no trailing CRLF)
fn read_snapshot<R: BufRead>(reader: &mut R) -> Result<Bytes> {
    let header = read_line(reader)?;
    let len = header
        .strip_prefix('$')
        .and_then(|len| len.parse::<usize>().ok())
        .ok_or_else(|| TideError::Handshake(format!("invalid snapshot header '{}'", header)))?;

    if len > MAX_BULK_LEN {
        return Err(TideError::Handshake(format!(
            "snapshot of {} bytes exceeds maximum {}",
            len, MAX_BULK_LEN
        )));
    }

    let mut payload = Vec::new();
    (&mut *reader).take(len as u64).read_to_end(&mut payload)?;
    if payload.len() != len {
        return Err(TideError::Handshake(format!(
            "snapshot truncated after {} of {} bytes",
            payload.len(),
            len
        )));
    }
    Ok(Bytes::from(payload))
}

// =============================================================================
// Replication link
// =============================================================================

/// Applies the master's command stream after the handshake
pub struct ReplicationLink {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    dispatcher: Dispatcher,
    framer: Framer,
}

impl ReplicationLink {
    /// `reader` must be the reader used for the handshake so that bytes
    /// buffered past the snapshot are not lost
    pub fn new(reader: BufReader<TcpStream>, writer: TcpStream, dispatcher: Dispatcher) -> Self {
        Self {
            reader,
            writer,
            dispatcher,
            framer: Framer::new(),
        }
    }

    /// Apply commands until the master closes the link
    pub fn run(mut self) -> Result<()> {
        let mut buf = [0u8; 4096];

        loop {
            let n = match self.reader.read(&mut buf) {
                Ok(0) => {
                    tracing::info!("Master closed the replication link");
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            let mut ready = self.feed(&buf[..n]);
            while ready {
                if let Some(command) = self.framer.take_command() {
                    self.apply(command)?;
                }
                ready = self.feed(&[]);
            }
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> bool {
        let mut result = self.framer.feed(bytes);
        loop {
            match result {
                Ok(ready) => return ready,
                Err(e) => {
                    tracing::warn!("Dropping malformed data from master: {}", e);
                    if e.is_protocol() {
                        self.framer.reset();
                    }
                    result = self.framer.feed(&[]);
                }
            }
        }
    }

    fn apply(&mut self, command: ParsedCommand) -> Result<()> {
        let len = command.raw.len() as u64;
        tracing::trace!("Applying replicated {} ({} bytes)", command.name, len);

        if let Some(reply) = self.dispatcher.apply_replicated(&command) {
            write_reply(&mut self.writer, &reply)?;
        }

        if let Some(slave) = self.dispatcher.engine().as_slave() {
            slave.advance(len);
        }
        Ok(())
    }
}
