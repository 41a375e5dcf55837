//! TideKV Server Binary
//!
//! Starts the TCP server, as a master or as a replica of `--replicaof`.

use std::path::PathBuf;

use clap::Parser;
use tidekv::{Config, ReplicaOf, Server};
use tracing_subscriber::{fmt, EnvFilter};

/// TideKV Server
#[derive(Parser, Debug)]
#[command(name = "tidekv-server")]
#[command(about = "In-memory key-value store with streams and replication")]
#[command(version)]
struct Args {
    /// Listen port
    #[arg(short, long, default_value = "6379")]
    port: u16,

    /// Listen host
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Replicate from a master, given as "<host> <port>"
    #[arg(long)]
    replicaof: Option<String>,

    /// Directory holding the snapshot file
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Snapshot file name
    #[arg(long, default_value = "dump.rdb")]
    dbfilename: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tidekv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("TideKV Server v{}", tidekv::VERSION);

    let mut builder = Config::builder()
        .bind_host(&args.bind)
        .port(args.port)
        .max_connections(args.max_connections)
        .snapshot_dir(&args.dir)
        .snapshot_filename(&args.dbfilename);

    if let Some(value) = &args.replicaof {
        match ReplicaOf::parse(value) {
            Ok(master) => builder = builder.replica_of(master),
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    }
    let config = builder.build();

    tracing::info!("Snapshot file: {}", tidekv::snapshot::file_path(&config).display());

    let mut server = Server::new(config);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
