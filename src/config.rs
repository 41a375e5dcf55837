//! Configuration for TideKV
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, TideError};

/// Main configuration for a TideKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Host the listener binds to
    pub bind_host: String,

    /// TCP listen port (0 picks an ephemeral port)
    pub port: u16,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 disables)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 disables)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Replication Configuration
    // -------------------------------------------------------------------------
    /// Master to replicate from; `None` runs as master
    pub replica_of: Option<ReplicaOf>,

    // -------------------------------------------------------------------------
    // Snapshot Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the snapshot file
    pub snapshot_dir: PathBuf,

    /// Snapshot file name inside `snapshot_dir`
    pub snapshot_filename: String,
}

/// Address of the master a replica connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaOf {
    pub host: String,
    pub port: u16,
}

impl ReplicaOf {
    /// Parse the `"<host> <port>"` form accepted by `--replicaof`
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.split_whitespace();
        let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(TideError::Config(format!(
                "replicaof expects '<host> <port>', got '{}'",
                value
            )));
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| TideError::Config(format!("invalid master port '{}'", port)))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// `host:port` string usable with `TcpStream::connect`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ReplicaOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 6379,
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
            replica_of: None,
            snapshot_dir: PathBuf::from("."),
            snapshot_filename: "dump.rdb".to_string(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `host:port` the listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the bind host
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.config.bind_host = host.into();
        self
    }

    /// Set the TCP listen port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Replicate from the given master
    pub fn replica_of(mut self, master: ReplicaOf) -> Self {
        self.config.replica_of = Some(master);
        self
    }

    /// Set the snapshot directory
    pub fn snapshot_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.snapshot_dir = path.into();
        self
    }

    /// Set the snapshot file name
    pub fn snapshot_filename(mut self, name: impl Into<String>) -> Self {
        self.config.snapshot_filename = name.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
