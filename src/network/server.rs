//! TCP Server
//!
//! Accepts connections and hands each one to its own worker thread.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{Config, ReplicaOf};
use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::error::{Result, TideError};
use crate::protocol::Reply;
use crate::replication::{handshake, ReplicationLink};
use crate::snapshot;
use super::connection::Connection;

/// Pause between accept attempts while no client is waiting
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// TCP server for TideKV
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    listener: Option<TcpListener>,
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    /// Create a server; the engine's role follows `config.replica_of`
    pub fn new(config: Config) -> Self {
        let engine = Arc::new(Engine::new(config.clone()));
        Self {
            config,
            engine,
            listener: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// Bind the listening socket; returns the bound address
    ///
    /// Port 0 picks a free port.
    pub fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }
        let listener = TcpListener::bind(self.config.listen_addr())?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {}", addr);
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Flag observed by the accept loop; set it to stop the server
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Start the server (blocking)
    ///
    /// A replica completes its handshake with the master before accepting
    /// clients; a failed handshake is returned as an error.
    pub fn run(&mut self) -> Result<()> {
        let addr = self.bind()?;

        if let Some(master) = self.config.replica_of.clone() {
            self.start_replication(&master, addr.port())?;
        }

        let listener = self
            .listener
            .take()
            .ok_or_else(|| TideError::Config("listener is not bound".to_string()))?;
        listener.set_nonblocking(true)?;

        while !self.shutdown.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    self.spawn_connection(stream, peer);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                }
            }
        }

        tracing::info!("Server on {} shutting down", addr);
        Ok(())
    }

    fn spawn_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let active = Arc::clone(&self.active_connections);
        if active.fetch_add(1, Ordering::AcqRel) >= self.config.max_connections {
            active.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("Rejecting {}: connection limit reached", peer);
            let reply = Reply::error("max number of clients reached");
            let _ = stream.write_all(&reply.encode());
            return;
        }

        let engine = Arc::clone(&self.engine);
        let (read_ms, write_ms) = (self.config.read_timeout_ms, self.config.write_timeout_ms);

        let spawned = thread::Builder::new()
            .name(format!("conn-{}", peer))
            .spawn(move || {
                let result = Connection::new(stream, engine).and_then(|mut connection| {
                    connection.set_timeouts(read_ms, write_ms)?;
                    connection.handle()
                });
                if let Err(e) = result {
                    tracing::debug!("Connection {} ended with error: {}", peer, e);
                }
                active.fetch_sub(1, Ordering::AcqRel);
            });

        if let Err(e) = spawned {
            tracing::warn!("Failed to spawn worker for {}: {}", peer, e);
            self.active_connections.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Handshake with the master, load its snapshot and start applying the
    /// propagated command stream
    fn start_replication(&self, master: &ReplicaOf, listening_port: u16) -> Result<()> {
        tracing::info!("Replicating from master {}", master);
        let mut writer = TcpStream::connect(master.addr())?;
        writer.set_nodelay(true)?;
        let mut reader = BufReader::new(writer.try_clone()?);

        let outcome = handshake(&mut reader, &mut writer, listening_port)?;
        if let Some(slave) = self.engine.as_slave() {
            slave.set_master_replication_id(outcome.replication_id.clone());
        }

        match snapshot::read_entries(&outcome.snapshot[..]) {
            Ok(entries) => {
                let loaded = self.engine.load_snapshot(entries);
                tracing::info!("Loaded {} keys from the master snapshot", loaded);
            }
            Err(e) => tracing::warn!("Ignoring undecodable master snapshot: {}", e),
        }
        tracing::info!("Handshake with master {} complete", master);

        let link = ReplicationLink::new(reader, writer, Dispatcher::new(self.engine()));
        thread::Builder::new()
            .name("replication".to_string())
            .spawn(move || {
                if let Err(e) = link.run() {
                    tracing::warn!("Replication link failed: {}", e);
                }
            })?;
        Ok(())
    }
}
