//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single non-blocking acceptor loop
//! - One worker thread per connection
//! - Commands routed through the Dispatcher

mod connection;
mod server;

pub use connection::Connection;
pub use server::Server;
