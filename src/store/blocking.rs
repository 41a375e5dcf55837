//! Blocked stream reads
//!
//! Registry of connections parked in `XREAD BLOCK`, woken by `XADD`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

/// Why a blocked read stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A watched key received a new entry
    Woken,
    /// The deadline passed first
    TimedOut,
}

struct Waiter {
    id: u64,
    keys: Vec<String>,
    wake: Sender<()>,
}

/// All currently blocked readers
#[derive(Default)]
pub struct BlockingReads {
    waiters: Mutex<Vec<Waiter>>,
    next_id: AtomicU64,
}

impl BlockingReads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a reader on `keys`
    ///
    /// Register before checking the store so an append landing between the
    /// check and the wait is not missed.
    pub fn register(&self, keys: Vec<String>) -> BlockedRead<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (wake, woken) = channel::bounded(1);
        self.waiters.lock().push(Waiter { id, keys, wake });
        BlockedRead {
            id,
            registry: self,
            woken,
        }
    }

    /// Wake every reader watching `key`; returns how many were signalled
    pub fn notify(&self, key: &str) -> usize {
        let waiters = self.waiters.lock();
        let mut signalled = 0;
        for waiter in waiters.iter().filter(|w| w.keys.iter().any(|k| k == key)) {
            // a full slot already means "wake up"
            let _ = waiter.wake.try_send(());
            signalled += 1;
        }
        signalled
    }

    /// Number of readers currently parked
    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }

    fn unregister(&self, id: u64) {
        self.waiters.lock().retain(|waiter| waiter.id != id);
    }
}

/// Registration handle; dropping it removes the waiter
pub struct BlockedRead<'a> {
    id: u64,
    registry: &'a BlockingReads,
    woken: Receiver<()>,
}

impl BlockedRead<'_> {
    /// Wait for a wake signal or until `deadline` (`None` waits forever)
    pub fn wait(&self, deadline: Option<Instant>) -> WakeReason {
        let timer = match deadline {
            Some(deadline) => channel::at(deadline),
            None => channel::never(),
        };

        crossbeam::select! {
            recv(self.woken) -> _ => WakeReason::Woken,
            recv(timer) -> _ => WakeReason::TimedOut,
        }
    }
}

impl Drop for BlockedRead<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
