//! Engine Module
//!
//! The server handle that ties the components together.
//!
//! ## Responsibilities
//! - Own the keyspace, blocked-read registry and snapshot fallback
//! - Carry the role chosen at startup (master or replica)
//! - Serialize write execution so replicas observe writes in commit order

use parking_lot::{Mutex, MutexGuard};

use crate::config::Config;
use crate::dispatch::CommandRegistry;
use crate::replication::{generate_replication_id, MasterState, Role, RoleState, SlaveState};
use crate::snapshot::{self, SnapshotEntry, SnapshotSource};
use crate::store::{now_ms, BlockingReads, Store, Value};

/// Shared server state
///
/// ## Concurrency Model
///
/// - **Writes**: serialized by `write_lock`, held across execution and
///   propagation so replicas receive writes in the order they committed
/// - **Reads**: go straight to the store, which locks internally
/// - **Blocking commands** (XREAD BLOCK, WAIT) never hold `write_lock`
pub struct Engine {
    config: Config,
    store: Store,
    blocking: BlockingReads,
    snapshot: SnapshotSource,
    role: RoleState,
    registry: CommandRegistry,

    /// Serializes write commands
    write_lock: Mutex<()>,
}

impl Engine {
    /// Create an engine; the role follows `config.replica_of`
    pub fn new(config: Config) -> Self {
        let role = match &config.replica_of {
            Some(master) => RoleState::Slave(SlaveState::new(master.clone())),
            None => RoleState::Master(MasterState::new(generate_replication_id())),
        };
        let snapshot = SnapshotSource::new(snapshot::file_path(&config));

        Self {
            config,
            store: Store::new(),
            blocking: BlockingReads::new(),
            snapshot,
            role,
            registry: CommandRegistry::with_builtin_commands(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn blocking(&self) -> &BlockingReads {
        &self.blocking
    }

    pub fn snapshot(&self) -> &SnapshotSource {
        &self.snapshot
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    pub fn role_state(&self) -> &RoleState {
        &self.role
    }

    pub fn as_master(&self) -> Option<&MasterState> {
        match &self.role {
            RoleState::Master(master) => Some(master),
            RoleState::Slave(_) => None,
        }
    }

    pub fn as_slave(&self) -> Option<&SlaveState> {
        match &self.role {
            RoleState::Slave(slave) => Some(slave),
            RoleState::Master(_) => None,
        }
    }

    /// Take the write lock
    pub(crate) fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Copy snapshot entries into the live store, skipping expired ones
    ///
    /// Returns the number of keys loaded.
    pub fn load_snapshot(&self, entries: Vec<SnapshotEntry>) -> usize {
        let now = now_ms();
        let _write_guard = self.write_guard();
        let mut loaded = 0;
        for entry in entries.into_iter().filter(|entry| !entry.is_expired(now)) {
            self.store
                .set(entry.key, Value::from_input(&entry.value), entry.expires_at_ms);
            loaded += 1;
        }
        loaded
    }
}
