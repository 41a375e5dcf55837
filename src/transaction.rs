//! Transaction Module
//!
//! Per-connection MULTI/EXEC/DISCARD queue.
//!
//! ```text
//!  Closed ──MULTI──▶ Open ──EXEC / DISCARD──▶ Closed
//!                    │  ▲
//!                    └──┘ other commands are queued (MULTI is a no-op)
//! ```

use crate::error::{Result, TideError};
use crate::protocol::ParsedCommand;

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Closed,
    Open,
}

/// Command queue owned by a single connection
#[derive(Debug, Default)]
pub struct Transaction {
    /// `None` while closed
    queued: Option<Vec<ParsedCommand>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransactionState {
        match self.queued {
            Some(_) => TransactionState::Open,
            None => TransactionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.queued.is_some()
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.queued.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// MULTI: open the transaction; an open one keeps its queue
    pub fn begin(&mut self) {
        if self.queued.is_none() {
            self.queued = Some(Vec::new());
        }
    }

    /// Queue a command for EXEC
    pub fn enqueue(&mut self, command: ParsedCommand) -> Result<()> {
        match self.queued.as_mut() {
            Some(queue) => {
                queue.push(command);
                Ok(())
            }
            None => Err(TideError::Transaction("no transaction is open".to_string())),
        }
    }

    /// EXEC: close the transaction and hand back its queue in FIFO order
    pub fn take(&mut self) -> Result<Vec<ParsedCommand>> {
        self.queued
            .take()
            .ok_or_else(|| TideError::Transaction("EXEC without MULTI".to_string()))
    }

    /// DISCARD: close the transaction, dropping its queue
    pub fn discard(&mut self) -> Result<usize> {
        self.queued
            .take()
            .map(|queue| queue.len())
            .ok_or_else(|| TideError::Transaction("DISCARD without MULTI".to_string()))
    }
}
