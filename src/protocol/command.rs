//! Command definitions
//!
//! Represents commands received from clients or from a master.

use std::fmt;

use bytes::Bytes;

/// Every command name the server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Ping,
    Echo,
    Set,
    Get,
    Incr,
    Type,
    Keys,
    Info,
    Config,
    Multi,
    Exec,
    Discard,
    ReplConf,
    Psync,
    Wait,
    XAdd,
    XRange,
    XRead,
}

impl CommandName {
    pub const ALL: [CommandName; 18] = [
        CommandName::Ping,
        CommandName::Echo,
        CommandName::Set,
        CommandName::Get,
        CommandName::Incr,
        CommandName::Type,
        CommandName::Keys,
        CommandName::Info,
        CommandName::Config,
        CommandName::Multi,
        CommandName::Exec,
        CommandName::Discard,
        CommandName::ReplConf,
        CommandName::Psync,
        CommandName::Wait,
        CommandName::XAdd,
        CommandName::XRange,
        CommandName::XRead,
    ];

    /// Case-insensitive lookup of a command name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(name))
    }

    /// Canonical uppercase spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Ping => "PING",
            CommandName::Echo => "ECHO",
            CommandName::Set => "SET",
            CommandName::Get => "GET",
            CommandName::Incr => "INCR",
            CommandName::Type => "TYPE",
            CommandName::Keys => "KEYS",
            CommandName::Info => "INFO",
            CommandName::Config => "CONFIG",
            CommandName::Multi => "MULTI",
            CommandName::Exec => "EXEC",
            CommandName::Discard => "DISCARD",
            CommandName::ReplConf => "REPLCONF",
            CommandName::Psync => "PSYNC",
            CommandName::Wait => "WAIT",
            CommandName::XAdd => "XADD",
            CommandName::XRange => "XRANGE",
            CommandName::XRead => "XREAD",
        }
    }

    /// Commands that control the transaction itself and are never queued
    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            CommandName::Multi | CommandName::Exec | CommandName::Discard
        )
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully framed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Verbatim bytes consumed for this command (forwarded to replicas)
    pub raw: Bytes,

    /// The command being invoked
    pub name: CommandName,

    /// Arguments after the command name
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Build a command from its parts, encoding `raw` as a RESP array
    pub fn from_parts(name: CommandName, args: Vec<String>) -> Self {
        let mut parts: Vec<&str> = Vec::with_capacity(args.len() + 1);
        parts.push(name.as_str());
        parts.extend(args.iter().map(String::as_str));
        let raw = Bytes::from(super::encode_command(&parts));
        Self { raw, name, args }
    }

    /// Argument at `index`, if present
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}
