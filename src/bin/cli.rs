//! TideKV CLI Client
//!
//! Sends one command to a server and prints the reply.

use clap::Parser;
use tidekv::protocol::Reply;
use tidekv::Client;

/// TideKV CLI
#[derive(Parser, Debug)]
#[command(name = "tidekv-cli")]
#[command(about = "CLI for the TideKV key-value store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    /// Command and arguments, e.g. `SET key value PX 100`
    #[arg(required = true, num_args = 1..)]
    command: Vec<String>,
}

fn main() {
    let args = Args::parse();

    let reply = Client::connect(&args.server).and_then(|mut client| client.send(&args.command[..]));
    match reply {
        Ok(reply) => {
            print_reply(&reply, 0);
            if reply.is_error() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_reply(reply: &Reply, depth: usize) {
    let indent = "  ".repeat(depth);
    match reply {
        Reply::Simple(text) => println!("{}{}", indent, text),
        Reply::Error(text) => println!("{}(error) {}", indent, text),
        Reply::Integer(value) => println!("{}(integer) {}", indent, value),
        Reply::Bulk(bytes) | Reply::Snapshot(bytes) => {
            println!("{}\"{}\"", indent, String::from_utf8_lossy(bytes))
        }
        Reply::Null | Reply::NullArray => println!("{}(nil)", indent),
        Reply::Array(items) if items.is_empty() => println!("{}(empty array)", indent),
        Reply::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                println!("{}{})", indent, i + 1);
                print_reply(item, depth + 1);
            }
        }
    }
}
