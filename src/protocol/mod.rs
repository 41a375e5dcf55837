//! Protocol Module
//!
//! RESP, the request/reply wire protocol spoken by clients and replicas.
//!
//! ## Requests
//! ```text
//! *<count>\r\n                array of bulk strings
//! $<len>\r\n<bytes>\r\n       one element (the first is the command name)
//! PING\r\n                    inline form, whitespace separated
//! ```
//!
//! ## Replies
//! - `+OK\r\n`            simple string
//! - `$3\r\nbar\r\n`      bulk string (`$-1\r\n` is null)
//! - `*2\r\n...`          array
//! - `:42\r\n`            integer
//! - `-ERR msg\r\n`       error

mod command;
mod framer;
mod reply;

pub use command::{CommandName, ParsedCommand};
pub use framer::{Framer, FramerState, MAX_ARRAY_LEN, MAX_BULK_LEN, MAX_LINE_LEN};
pub use reply::{encode_command, read_line, read_reply, write_reply, Reply, CRLF};
