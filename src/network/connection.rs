//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::{Dispatcher, Response, Session};
use crate::engine::Engine;
use crate::error::{Result, TideError};
use crate::protocol::{Framer, ParsedCommand, Reply};

/// Bytes requested from the socket per read
const READ_CHUNK: usize = 4096;

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    dispatcher: Dispatcher,
    framer: Framer,
    session: Session,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            dispatcher: Dispatcher::new(engine),
            framer: Framer::new(),
            session: Session::new(),
            peer_addr,
        })
    }

    /// Configure socket timeouts (0 disables a timeout)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Feeds every chunk read into the framer and dispatches each complete
    /// command in arrival order. A framing error is answered with an error
    /// reply and the framer is reset.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);
        let result = self.serve();
        self.release_replica();
        result
    }

    fn serve(&mut self) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let n = match self.reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if is_disconnect(&e) => {
                    tracing::debug!("Connection from {} closed: {}", self.peer_addr, e);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    return Err(e.into());
                }
            };

            let mut ready = self.feed(&buf[..n])?;
            while ready {
                if let Some(command) = self.framer.take_command() {
                    if !self.process(command)? {
                        return Ok(());
                    }
                }
                ready = self.feed(&[])?;
            }
        }
    }

    /// Feed bytes to the framer, answering framing errors in place
    ///
    /// Each rejected command gets exactly one error reply. The framer is
    /// reset only when the stream itself is malformed.
    fn feed(&mut self, bytes: &[u8]) -> Result<bool> {
        let mut result = self.framer.feed(bytes);
        loop {
            match result {
                Ok(ready) => return Ok(ready),
                Err(e) => {
                    tracing::warn!("Protocol error from {}: {}", self.peer_addr, e);
                    if e.is_protocol() {
                        self.framer.reset();
                    }
                    self.send(&Reply::from_error(&e))?;
                    result = self.framer.feed(&[]);
                }
            }
        }
    }

    /// Dispatch one command; returns false once the peer is gone
    fn process(&mut self, command: ParsedCommand) -> Result<bool> {
        tracing::trace!("Received {} from {}: {:?}", command.name, self.peer_addr, command.args);

        let response = self.dispatcher.dispatch(&mut self.session, command);
        let sent = match response {
            Response::Reply(reply) => self.send(&reply),
            Response::Silent => Ok(()),
            Response::FullResync { header, snapshot } => self.start_replica(header, snapshot),
        };

        match sent {
            Ok(()) => Ok(true),
            Err(TideError::Io(ref e)) if is_disconnect(e) => {
                tracing::debug!("Client {} disconnected before the reply was sent", self.peer_addr);
                Ok(false)
            }
            Err(e) => {
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                Err(e)
            }
        }
    }

    /// Send the resync header and snapshot, then register as a replica
    fn start_replica(&mut self, header: Reply, snapshot: bytes::Bytes) -> Result<()> {
        let mut out = header.encode();
        Reply::Snapshot(snapshot).encode_into(&mut out);
        self.writer.write_all(&out)?;
        self.writer.flush()?;

        let Some(master) = self.dispatcher.engine().as_master() else {
            return Ok(());
        };
        let stream = self.writer.get_ref().try_clone()?;
        let id = master.register_replica(stream, self.peer_addr.clone());
        self.session.replica_id = Some(id);
        Ok(())
    }

    fn send(&mut self, reply: &Reply) -> Result<()> {
        self.writer.write_all(&reply.encode())?;
        self.writer.flush()?;
        Ok(())
    }

    fn release_replica(&mut self) {
        if let (Some(id), Some(master)) = (
            self.session.replica_id.take(),
            self.dispatcher.engine().as_master(),
        ) {
            master.remove_replica(id);
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
    )
}
