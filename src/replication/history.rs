//! Command history
//!
//! Append-only record of every command dispatched on a master. WAIT looks
//! at the entry right before its own to decide whether there is a write to
//! wait for, and replica acknowledgements are counted on that entry.

use parking_lot::Mutex;

use crate::dispatch::CommandKind;
use crate::protocol::CommandName;

/// One dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub name: CommandName,
    pub kind: CommandKind,
    pub args: Vec<String>,
    pub success: bool,
    pub ack_count: usize,
}

/// Shared, append-only command history
#[derive(Debug, Default)]
pub struct CommandHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command before it runs; returns its index
    pub fn append(&self, name: CommandName, kind: CommandKind, args: Vec<String>) -> usize {
        let mut entries = self.entries.lock();
        entries.push(HistoryEntry {
            name,
            kind,
            args,
            success: false,
            ack_count: 0,
        });
        entries.len() - 1
    }

    /// Record whether the command at `index` succeeded
    pub fn mark_success(&self, index: usize, success: bool) {
        if let Some(entry) = self.entries.lock().get_mut(index) {
            entry.success = success;
        }
    }

    /// Count one acknowledgement against `index`; returns the new count
    pub fn record_ack(&self, index: usize) -> Option<usize> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(index)?;
        entry.ack_count += 1;
        Some(entry.ack_count)
    }

    pub fn ack_count(&self, index: usize) -> usize {
        self.entries.lock().get(index).map_or(0, |entry| entry.ack_count)
    }

    pub fn get(&self, index: usize) -> Option<HistoryEntry> {
        self.entries.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
