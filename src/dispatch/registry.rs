//! Command table
//!
//! Static metadata for every command: read/write classification, arity and
//! the handler that executes it against the engine.

use std::collections::HashMap;

use crate::error::{Result, TideError};
use crate::protocol::{CommandName, ParsedCommand};
use super::handlers::{
    handle_config, handle_echo, handle_get, handle_incr, handle_info, handle_keys, handle_ping,
    handle_set, handle_type, handle_wait, handle_xadd, handle_xrange, handle_xread,
};
use super::CommandHandler;

/// Whether a command mutates the keyspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Write,
}

/// Arity constraints, counted on arguments after the command name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandArity {
    /// Exactly this many arguments
    Exact(usize),
    /// At least this many arguments
    AtLeast(usize),
    /// Inclusive range of argument counts
    Between(usize, usize),
}

impl CommandArity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            CommandArity::Exact(n) => count == n,
            CommandArity::AtLeast(n) => count >= n,
            CommandArity::Between(min, max) => (min..=max).contains(&count),
        }
    }
}

/// Metadata and callback for one command table entry
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: CommandName,
    pub kind: CommandKind,
    pub arity: CommandArity,

    /// `None` for commands the dispatcher handles itself because they act
    /// on the connection (transactions, PSYNC, REPLCONF)
    pub handler: Option<CommandHandler>,
}

impl CommandSpec {
    pub fn check_arity(&self, command: &ParsedCommand) -> Result<()> {
        if self.arity.accepts(command.args.len()) {
            Ok(())
        } else {
            Err(TideError::WrongArity(self.name.as_str().to_ascii_lowercase()))
        }
    }
}

/// Runtime command registry
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: HashMap<CommandName, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every supported command
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        registry.register_connection_commands();
        registry.register_keyspace_commands();
        registry.register_server_commands();
        registry.register_transaction_commands();
        registry.register_replication_commands();
        registry.register_stream_commands();
        registry
    }

    pub fn register(&mut self, spec: CommandSpec) {
        self.entries.insert(spec.name, spec);
    }

    pub fn get(&self, name: CommandName) -> Option<&CommandSpec> {
        self.entries.get(&name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add(
        &mut self,
        name: CommandName,
        kind: CommandKind,
        arity: CommandArity,
        handler: Option<CommandHandler>,
    ) {
        self.register(CommandSpec {
            name,
            kind,
            arity,
            handler,
        });
    }

    fn register_connection_commands(&mut self) {
        use CommandKind::Read;
        self.add(CommandName::Ping, Read, CommandArity::Between(0, 1), Some(handle_ping));
        self.add(CommandName::Echo, Read, CommandArity::Exact(1), Some(handle_echo));
    }

    fn register_keyspace_commands(&mut self) {
        use CommandKind::{Read, Write};
        self.add(CommandName::Set, Write, CommandArity::AtLeast(2), Some(handle_set));
        self.add(CommandName::Get, Read, CommandArity::Exact(1), Some(handle_get));
        self.add(CommandName::Incr, Write, CommandArity::Exact(1), Some(handle_incr));
        self.add(CommandName::Type, Read, CommandArity::Exact(1), Some(handle_type));
        self.add(CommandName::Keys, Read, CommandArity::Exact(1), Some(handle_keys));
    }

    fn register_server_commands(&mut self) {
        use CommandKind::Read;
        self.add(CommandName::Info, Read, CommandArity::Between(0, 1), Some(handle_info));
        self.add(CommandName::Config, Read, CommandArity::AtLeast(2), Some(handle_config));
    }

    fn register_transaction_commands(&mut self) {
        use CommandKind::Read;
        self.add(CommandName::Multi, Read, CommandArity::Exact(0), None);
        self.add(CommandName::Exec, Read, CommandArity::Exact(0), None);
        self.add(CommandName::Discard, Read, CommandArity::Exact(0), None);
    }

    fn register_replication_commands(&mut self) {
        use CommandKind::Read;
        self.add(CommandName::ReplConf, Read, CommandArity::AtLeast(1), None);
        self.add(CommandName::Psync, Read, CommandArity::Exact(2), None);
        self.add(CommandName::Wait, Read, CommandArity::Exact(2), Some(handle_wait));
    }

    fn register_stream_commands(&mut self) {
        use CommandKind::{Read, Write};
        self.add(CommandName::XAdd, Write, CommandArity::AtLeast(4), Some(handle_xadd));
        self.add(CommandName::XRange, Read, CommandArity::AtLeast(3), Some(handle_xrange));
        self.add(CommandName::XRead, Read, CommandArity::AtLeast(3), Some(handle_xread));
    }
}
