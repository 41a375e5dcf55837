//! Command Dispatch
//!
//! Resolves framed commands against the command table and executes them.
//!
//! ## Execution path
//! ```text
//! ParsedCommand ──▶ history (master) ──▶ arity ──▶ queue? (MULTI open)
//!                                                     │
//!            ┌────────────────────────────────────────┤
//!            ▼                                        ▼
//!   connection commands                      table handler
//!   MULTI/EXEC/DISCARD                 (writes: write lock, then
//!   PSYNC, REPLCONF                     propagate to replicas)
//! ```

mod handlers;
mod registry;

use std::sync::Arc;

use bytes::Bytes;

use crate::engine::Engine;
use crate::error::{Result, TideError};
use crate::protocol::{CommandName, ParsedCommand, Reply};
use crate::snapshot;
use crate::transaction::Transaction;

pub use handlers::glob_match;
pub use registry::{CommandArity, CommandKind, CommandRegistry, CommandSpec};

/// Handler function signature used by command table entries
pub type CommandHandler = fn(&Engine, &ParsedCommand, &ExecContext) -> Result<Reply>;

/// Per-invocation facts a handler may need
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecContext {
    /// Index of this command in the master's history
    pub history_index: Option<usize>,

    /// Running as part of EXEC; blocking commands return immediately
    pub in_transaction: bool,
}

/// Connection-scoped dispatch state
#[derive(Debug, Default)]
pub struct Session {
    pub transaction: Transaction,

    /// Set once this connection completed PSYNC and became a replica link
    pub replica_id: Option<u64>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What the connection should send back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reply(Reply),

    /// Nothing is written (`REPLCONF ACK`)
    Silent,

    /// Send `+FULLRESYNC` and the snapshot, then register the connection
    /// as a replica
    FullResync { header: Reply, snapshot: Bytes },
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Response::Reply(reply)
    }
}

/// Executes commands against a shared engine
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<Engine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Dispatch one command received from a client connection
    pub fn dispatch(&self, session: &mut Session, command: ParsedCommand) -> Response {
        let Some(spec) = self.engine.registry().get(command.name).copied() else {
            return Reply::from_error(&TideError::UnknownCommand(command.name.to_string())).into();
        };

        let history_index = self
            .engine
            .as_master()
            .map(|master| master.history().append(command.name, spec.kind, command.args.clone()));

        let response = self.dispatch_spec(session, &spec, command, history_index);

        if let (Some(master), Some(index)) = (self.engine.as_master(), history_index) {
            let failed = matches!(&response, Response::Reply(reply) if reply.is_error());
            master.history().mark_success(index, !failed);
        }
        response
    }

    fn dispatch_spec(
        &self,
        session: &mut Session,
        spec: &CommandSpec,
        command: ParsedCommand,
        history_index: Option<usize>,
    ) -> Response {
        if let Err(e) = spec.check_arity(&command) {
            return Reply::from_error(&e).into();
        }

        if session.transaction.is_open() && !command.name.is_transaction_control() {
            tracing::trace!("Queued {} in transaction", command.name);
            return match session.transaction.enqueue(command) {
                Ok(()) => Reply::simple("QUEUED").into(),
                Err(e) => Reply::from_error(&e).into(),
            };
        }

        match command.name {
            CommandName::Multi => {
                session.transaction.begin();
                Reply::ok().into()
            }
            CommandName::Exec => self.exec(session).into(),
            CommandName::Discard => match session.transaction.discard() {
                Ok(_) => Reply::ok().into(),
                Err(e) => Reply::from_error(&e).into(),
            },
            CommandName::Psync => self.full_resync(),
            CommandName::ReplConf => self.replconf(session, &command),
            _ => {
                let ctx = ExecContext {
                    history_index,
                    in_transaction: false,
                };
                reply_or_error(self.execute(spec, &command, &ctx, true)).into()
            }
        }
    }

    /// Run a table handler; successful writes on a master are propagated
    /// when `propagate` is set
    fn execute(
        &self,
        spec: &CommandSpec,
        command: &ParsedCommand,
        ctx: &ExecContext,
        propagate: bool,
    ) -> Result<Reply> {
        let handler = spec
            .handler
            .ok_or_else(|| TideError::Syntax(format!("{} is not allowed here", spec.name)))?;

        if spec.kind == CommandKind::Read {
            return handler(&self.engine, command, ctx);
        }

        let _write_guard = self.engine.write_guard();
        let reply = handler(&self.engine, command, ctx)?;
        if propagate {
            if let Some(master) = self.engine.as_master() {
                master.propagate(&command.raw);
            }
        }
        Ok(reply)
    }

    /// EXEC: run the queue in order, collecting every reply
    fn exec(&self, session: &mut Session) -> Reply {
        let queued = match session.transaction.take() {
            Ok(queued) => queued,
            Err(e) => return Reply::from_error(&e),
        };
        tracing::debug!("Executing transaction with {} commands", queued.len());

        let ctx = ExecContext {
            history_index: None,
            in_transaction: true,
        };
        let replies = queued
            .iter()
            .map(|command| match self.engine.registry().get(command.name) {
                Some(spec) => reply_or_error(self.execute(spec, command, &ctx, false)),
                None => Reply::from_error(&TideError::UnknownCommand(command.name.to_string())),
            })
            .collect();
        Reply::Array(replies)
    }

    /// PSYNC: answer with `+FULLRESYNC` and an empty snapshot
    fn full_resync(&self) -> Response {
        let Some(master) = self.engine.as_master() else {
            return Reply::error("PSYNC is only served by a master").into();
        };
        match snapshot::empty_snapshot() {
            Ok(snapshot) => Response::FullResync {
                header: Reply::simple(format!(
                    "FULLRESYNC {} {}",
                    master.replication_id(),
                    master.offset()
                )),
                snapshot,
            },
            Err(e) => Reply::from_error(&e).into(),
        }
    }

    fn replconf(&self, session: &Session, command: &ParsedCommand) -> Response {
        let subcommand = command.arg(0).unwrap_or_default().to_ascii_lowercase();
        match subcommand.as_str() {
            "ack" => {
                let Some(master) = self.engine.as_master() else {
                    return Response::Silent;
                };
                match (session.replica_id, command.arg(1).map(str::parse::<u64>)) {
                    (Some(id), Some(Ok(offset))) => master.record_ack(id, offset),
                    (None, _) => tracing::warn!("Ignoring REPLCONF ACK from a non-replica"),
                    _ => tracing::warn!("Ignoring malformed REPLCONF ACK"),
                }
                Response::Silent
            }
            "getack" => self.getack_reply().into(),
            "listening-port" | "capa" => Reply::ok().into(),
            other => Reply::error(format!("unsupported REPLCONF option '{}'", other)).into(),
        }
    }

    /// `REPLCONF ACK <offset>` with the offset processed so far
    fn getack_reply(&self) -> Reply {
        let offset = self
            .engine
            .as_slave()
            .map_or(0, |slave| slave.offset());
        Reply::bulk_array(["REPLCONF".to_string(), "ACK".to_string(), offset.to_string()])
    }

    /// Apply a command received over the replication link
    ///
    /// Nothing is recorded or propagated. Only `REPLCONF GETACK` produces
    /// a reply; other results are discarded.
    pub fn apply_replicated(&self, command: &ParsedCommand) -> Option<Reply> {
        match command.name {
            CommandName::ReplConf => {
                let getack = command
                    .arg(0)
                    .is_some_and(|sub| sub.eq_ignore_ascii_case("getack"));
                getack.then(|| self.getack_reply())
            }
            CommandName::Multi
            | CommandName::Exec
            | CommandName::Discard
            | CommandName::Psync
            | CommandName::Wait => None,
            _ => {
                let spec = self.engine.registry().get(command.name)?;
                let ctx = ExecContext {
                    history_index: None,
                    in_transaction: true,
                };
                let result = spec
                    .check_arity(command)
                    .and_then(|()| self.execute(spec, command, &ctx, false));
                if let Err(e) = result {
                    tracing::warn!("Replicated {} failed: {}", command.name, e);
                }
                None
            }
        }
    }
}

fn reply_or_error(result: Result<Reply>) -> Reply {
    result.unwrap_or_else(|e| Reply::from_error(&e))
}
