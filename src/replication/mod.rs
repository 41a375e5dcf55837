//! Replication Module
//!
//! Master/replica roles, the command history used by WAIT, and the replica
//! side of the handshake.
//!
//! ## Flow
//! ```text
//!   replica                               master
//!      │ ── PING ───────────────────────────▶ │
//!      │ ◀─────────────────────────── +PONG ─ │
//!      │ ── REPLCONF listening-port <p> ────▶ │
//!      │ ── REPLCONF capa psync2 ───────────▶ │
//!      │ ── PSYNC ? -1 ─────────────────────▶ │
//!      │ ◀──── +FULLRESYNC <id> 0, $len<rdb> ─ │  (replica registered)
//!      │ ◀──────────── propagated writes ──── │
//!      │ ◀──────────── REPLCONF GETACK * ──── │  (WAIT)
//!      │ ── REPLCONF ACK <offset> ──────────▶ │
//! ```

mod history;
mod master;
mod slave;

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;

pub use history::{CommandHistory, HistoryEntry};
pub use master::MasterState;
pub use slave::{handshake, HandshakeOutcome, ReplicationLink, SlaveState};

/// Length of a replication id
pub const REPLICATION_ID_LEN: usize = 40;

/// Server role, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-specific replication state
pub enum RoleState {
    Master(MasterState),
    Slave(SlaveState),
}

impl RoleState {
    pub fn role(&self) -> Role {
        match self {
            RoleState::Master(_) => Role::Master,
            RoleState::Slave(_) => Role::Slave,
        }
    }

    /// Fields reported by `INFO replication`, in order
    pub fn info_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("role", self.role().to_string())];
        match self {
            RoleState::Master(master) => {
                fields.push(("connected_slaves", master.replica_count().to_string()));
                fields.push(("master_replid", master.replication_id().to_string()));
                fields.push(("master_repl_offset", master.offset().to_string()));
            }
            RoleState::Slave(slave) => {
                fields.push(("master_replid", slave.master_replication_id()));
                fields.push(("master_repl_offset", slave.offset().to_string()));
            }
        }
        fields
    }
}

/// Random 40-character id made of lowercase letters and digits
pub fn generate_replication_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .take(REPLICATION_ID_LEN)
        .collect()
}
