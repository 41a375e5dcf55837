//! Master-side replication
//!
//! Tracks connected replicas, forwards successful writes to them and
//! implements WAIT on top of `REPLCONF GETACK` / `REPLCONF ACK`.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};

use crate::dispatch::CommandKind;
use crate::protocol::encode_command;
use super::history::CommandHistory;

/// A registered replica connection
struct Replica {
    id: u64,
    peer_addr: String,
    stream: Mutex<TcpStream>,
}

impl Replica {
    fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut stream = self.stream.lock();
        stream.write_all(bytes)?;
        stream.flush()
    }
}

/// The single outstanding WAIT
struct AckWaiter {
    /// History index acknowledgements are counted against
    entry: usize,
    signal: Sender<()>,
}

/// Replication state of a master
pub struct MasterState {
    replication_id: String,
    offset: u64,
    replicas: RwLock<Vec<Replica>>,
    history: CommandHistory,
    ack_waiter: Mutex<Option<AckWaiter>>,
    next_replica_id: AtomicU64,
}

impl MasterState {
    pub fn new(replication_id: String) -> Self {
        Self {
            replication_id,
            offset: 0,
            replicas: RwLock::new(Vec::new()),
            history: CommandHistory::new(),
            ack_waiter: Mutex::new(None),
            next_replica_id: AtomicU64::new(1),
        }
    }

    pub fn replication_id(&self) -> &str {
        &self.replication_id
    }

    /// Offset announced in `+FULLRESYNC`
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    // =========================================================================
    // Replica registry
    // =========================================================================

    /// Register a replica after its snapshot was sent; returns its id
    pub fn register_replica(&self, stream: TcpStream, peer_addr: impl Into<String>) -> u64 {
        let id = self.next_replica_id.fetch_add(1, Ordering::Relaxed);
        let peer_addr = peer_addr.into();
        tracing::info!("Replica {} registered from {}", id, peer_addr);
        self.replicas.write().push(Replica {
            id,
            peer_addr,
            stream: Mutex::new(stream),
        });
        id
    }

    /// Forget a replica whose connection ended
    pub fn remove_replica(&self, id: u64) {
        let mut replicas = self.replicas.write();
        let before = replicas.len();
        replicas.retain(|replica| replica.id != id);
        if replicas.len() < before {
            tracing::info!("Replica {} disconnected", id);
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().len()
    }

    /// Send `bytes` verbatim to every replica in registration order
    ///
    /// A failed send is logged and does not stop delivery to the rest.
    /// Returns the number of replicas that received the bytes.
    pub fn propagate(&self, bytes: &[u8]) -> usize {
        let replicas = self.replicas.read();
        let mut delivered = 0;
        for replica in replicas.iter() {
            match replica.send(bytes) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    "Failed to propagate to replica {} ({}): {}",
                    replica.id,
                    replica.peer_addr,
                    e
                ),
            }
        }
        delivered
    }

    // =========================================================================
    // WAIT
    // =========================================================================

    /// Block until `num_replicas` acknowledge the write preceding history
    /// entry `wait_index`, or until `timeout` passes
    ///
    /// A zero timeout waits indefinitely. Returns the number of
    /// acknowledgements observed.
    pub fn wait_for_acks(&self, wait_index: usize, num_replicas: usize, timeout: Duration) -> usize {
        let connected = self.replica_count();
        if connected == 0 {
            return 0;
        }

        let target = match wait_index.checked_sub(1) {
            Some(index) => index,
            None => return connected,
        };
        match self.history.get(target) {
            Some(entry) if entry.kind == CommandKind::Write => {}
            _ => return connected,
        }

        let already = self.history.ack_count(target);
        if already >= num_replicas {
            return already;
        }

        let (signal, acks) = channel::unbounded();
        if self
            .ack_waiter
            .lock()
            .replace(AckWaiter { entry: target, signal })
            .is_some()
        {
            tracing::warn!("WAIT replaced an outstanding WAIT");
        }

        self.propagate(&encode_command(&["REPLCONF", "GETACK", "*"]));

        let timer = if timeout.is_zero() {
            channel::never()
        } else {
            channel::after(timeout)
        };

        let count = loop {
            crossbeam::select! {
                recv(acks) -> signal => {
                    let count = self.history.ack_count(target);
                    // a disconnected channel means another WAIT took over
                    if count >= num_replicas || signal.is_err() {
                        break count;
                    }
                }
                recv(timer) -> _ => break self.history.ack_count(target),
            }
        };

        let mut waiter = self.ack_waiter.lock();
        if waiter.as_ref().is_some_and(|w| w.entry == target) {
            *waiter = None;
        }
        count
    }

    /// Handle `REPLCONF ACK <offset>` from replica `replica_id`
    ///
    /// Counts towards the outstanding WAIT, if any. Acks from connections
    /// that are not registered replicas are ignored.
    pub fn record_ack(&self, replica_id: u64, offset: u64) {
        let registered = self.replicas.read().iter().any(|r| r.id == replica_id);
        if !registered {
            tracing::debug!("Ignoring ACK {} from unknown replica {}", offset, replica_id);
            return;
        }
        tracing::trace!("Replica {} acknowledged offset {}", replica_id, offset);

        let waiter = self.ack_waiter.lock();
        if let Some(waiter) = waiter.as_ref() {
            self.history.record_ack(waiter.entry);
            let _ = waiter.signal.send(());
        }
    }
}
