//! # TideKV
//!
//! An in-memory key-value store speaking the Redis wire protocol, with:
//! - Incremental RESP framing (arrays of bulk strings and inline commands)
//! - Strings, integers and append-only streams with lazy expiry
//! - MULTI/EXEC/DISCARD transactions
//! - Master/replica replication with WAIT acknowledgements
//! - Blocking stream reads (XREAD BLOCK)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │             (one worker thread per connection)               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ bytes
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Framer ──▶ Dispatcher                       │
//! │          (command table, per-connection transaction)         │
//! └──────────┬──────────────────┬───────────────────┬───────────┘
//!            │                  │                   │
//!            ▼                  ▼                   ▼
//!   ┌─────────────┐     ┌──────────────┐    ┌──────────────┐
//!   │    Store    │◀───▶│ Blocked reads│    │ Replication  │
//!   │  (Mutex)    │     │ (XREAD BLOCK)│    │ master/slave │
//!   └──────┬──────┘     └──────────────┘    └──────────────┘
//!          │ miss
//!          ▼
//!   ┌─────────────┐
//!   │  Snapshot   │
//!   │ (RDB file)  │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod store;
pub mod snapshot;
pub mod transaction;
pub mod dispatch;
pub mod replication;
pub mod engine;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TideError};
pub use config::{Config, ReplicaOf};
pub use engine::Engine;
pub use network::Server;
pub use client::Client;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
