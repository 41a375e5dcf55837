//! Client
//!
//! Minimal blocking client: sends commands as RESP arrays and decodes the
//! replies.

use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{encode_command, read_reply, Reply};

/// A connection to a TideKV server
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }

    /// Bound how long `read_reply` may block
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send a command and wait for its reply
    pub fn send<S: AsRef<str>>(&mut self, parts: &[S]) -> Result<Reply> {
        self.write_command(parts)?;
        self.read_reply()
    }

    /// Send a command without waiting for a reply
    pub fn write_command<S: AsRef<str>>(&mut self, parts: &[S]) -> Result<()> {
        self.write_raw(&encode_command(parts))
    }

    /// Send bytes verbatim (inline commands, pipelines)
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn read_reply(&mut self) -> Result<Reply> {
        read_reply(&mut self.reader)
    }
}
