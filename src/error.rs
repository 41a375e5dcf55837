//! Error types for TideKV
//!
//! Provides a unified error type for all operations. Command-level variants
//! are turned into protocol error replies by the dispatcher; the rest end a
//! connection or abort startup.

use thiserror::Error;

/// Result type alias using TideError
pub type Result<T> = std::result::Result<T, TideError>;

/// Unified error type for TideKV operations
#[derive(Debug, Error)]
pub enum TideError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors (framer must be reset)
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Command Errors (recovered with an error reply)
    // -------------------------------------------------------------------------
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("no such key")]
    NoSuchKey,

    #[error("{0}")]
    StreamId(String),

    #[error("{0}")]
    Transaction(String),

    // -------------------------------------------------------------------------
    // Replication Errors
    // -------------------------------------------------------------------------
    #[error("Handshake with master failed: {0}")]
    Handshake(String),

    // -------------------------------------------------------------------------
    // Snapshot Errors
    // -------------------------------------------------------------------------
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TideError {
    /// Error code placed in front of the message on the wire
    pub fn reply_code(&self) -> &'static str {
        match self {
            TideError::WrongType => "WRONGTYPE",
            _ => "ERR",
        }
    }

    /// True for errors that leave the framer in a failed state
    pub fn is_protocol(&self) -> bool {
        matches!(self, TideError::Protocol(_))
    }
}
