//! Store Module
//!
//! In-memory keyspace holding typed values.
//!
//! ## Responsibilities
//! - Typed values (string, integer, stream) behind an explicit tag
//! - Lazy expiry: expired keys are treated as absent and dropped on access
//! - Append-only streams with strictly increasing entry ids
//! - Wake-ups for blocked stream reads
//!
//! ## Data Structure Choice
//! A `HashMap` behind a single `parking_lot::Mutex`. Every command touches
//! at most one key and holds the lock only for the in-memory operation, so
//! mutations are atomic with respect to concurrent reads of the same key.

mod blocking;
mod keyspace;
mod stream;

use std::time::{SystemTime, UNIX_EPOCH};

pub use blocking::{BlockedRead, BlockingReads, WakeReason};
pub use keyspace::Store;
pub use stream::{IdRequest, Stream, StreamEntry, StreamId};

/// Value kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Stream,
}

impl ValueKind {
    /// Name reported by TYPE
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueKind::String | ValueKind::Integer => "string",
            ValueKind::Stream => "stream",
        }
    }
}

/// A stored value; exactly one kind is active
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Stream(Stream),
}

impl Value {
    /// Interpret client input: base-10 integers are stored as `Integer`
    ///
    /// Only the canonical spelling counts, so `007`, `+5` and `-0` stay
    /// strings and read back exactly as written.
    pub fn from_input(input: &str) -> Self {
        match input.parse::<i64>() {
            Ok(number) if number.to_string() == input => Value::Integer(number),
            _ => Value::String(input.to_string()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Integer(_) => ValueKind::Integer,
            Value::Stream(_) => ValueKind::Stream,
        }
    }
}

/// Entry stored in the keyspace
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryItem {
    pub value: Value,

    /// Absolute expiry in unix milliseconds; 0 means no expiry
    pub expires_at_ms: u64,
}

impl MemoryItem {
    pub fn new(value: Value, expires_at_ms: u64) -> Self {
        Self {
            value,
            expires_at_ms,
        }
    }

    /// A value that never expires
    pub fn persistent(value: Value) -> Self {
        Self::new(value, 0)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }
}

/// Current wall-clock time in unix milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
