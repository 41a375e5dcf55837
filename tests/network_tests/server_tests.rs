//! Server Tests
//!
//! End-to-end tests against a real TCP server bound on an ephemeral port.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use tidekv::protocol::Reply;
use tidekv::{Client, Config, Server};

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    _temp: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn start_server(max_connections: usize) -> TestServer {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .port(0)
        .max_connections(max_connections)
        .snapshot_dir(temp.path())
        .build();

    let mut server = Server::new(config);
    let addr = server.bind().unwrap();
    let shutdown = server.shutdown_handle();
    thread::spawn(move || server.run().unwrap());

    TestServer {
        addr,
        shutdown,
        _temp: temp,
    }
}

fn client(server: &TestServer) -> Client {
    let client = Client::connect(server.addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client
}

fn raw_stream(server: &TestServer) -> (TcpStream, BufReader<TcpStream>) {
    let stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (stream, reader)
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line
}

// =============================================================================
// Request/Reply Tests
// =============================================================================

#[test]
fn test_ping() {
    let server = start_server(16);
    let mut client = client(&server);

    assert_eq!(client.send(&["PING"]).unwrap(), Reply::simple("PONG"));
}

#[test]
fn test_set_get_over_tcp() {
    let server = start_server(16);
    let mut client = client(&server);

    assert_eq!(client.send(&["SET", "foo", "bar"]).unwrap(), Reply::ok());
    assert_eq!(client.send(&["GET", "foo"]).unwrap(), Reply::bulk_str("bar"));
    assert_eq!(client.send(&["GET", "missing"]).unwrap(), Reply::Null);
}

#[test]
fn test_inline_command() {
    let server = start_server(16);
    let (mut stream, mut reader) = raw_stream(&server);

    stream.write_all(b"ECHO hello\r\n").unwrap();
    assert_eq!(read_line(&mut reader), "$5\r\n");
    assert_eq!(read_line(&mut reader), "hello\r\n");
}

#[test]
fn test_command_split_across_writes() {
    let server = start_server(16);
    let (mut stream, mut reader) = raw_stream(&server);

    for piece in [&b"*2\r\n$4\r"[..], b"\nECHO\r\n$3\r\nh", b"ey\r\n"] {
        stream.write_all(piece).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(read_line(&mut reader), "$3\r\n");
    assert_eq!(read_line(&mut reader), "hey\r\n");
}

#[test]
fn test_pipelined_commands_reply_in_order() {
    let server = start_server(16);
    let mut client = client(&server);

    let mut pipeline = Vec::new();
    pipeline.extend(tidekv::protocol::encode_command(&["SET", "n", "1"]));
    pipeline.extend(tidekv::protocol::encode_command(&["INCR", "n"]));
    pipeline.extend(tidekv::protocol::encode_command(&["INCR", "n"]));
    pipeline.extend(tidekv::protocol::encode_command(&["GET", "n"]));
    client.write_raw(&pipeline).unwrap();

    assert_eq!(client.read_reply().unwrap(), Reply::ok());
    assert_eq!(client.read_reply().unwrap(), Reply::Integer(2));
    assert_eq!(client.read_reply().unwrap(), Reply::Integer(3));
    assert_eq!(client.read_reply().unwrap(), Reply::bulk_str("3"));
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_unknown_command_then_recovery() {
    let server = start_server(16);
    let mut client = client(&server);

    let reply = client.send(&["FLY", "away"]).unwrap();
    assert_eq!(reply, Reply::Error("ERR unknown command 'FLY'".to_string()));

    // the connection stays usable after the framer reset
    assert_eq!(client.send(&["PING"]).unwrap(), Reply::simple("PONG"));
}

#[test]
fn test_split_unknown_command_gets_one_reply() {
    let server = start_server(16);
    let (mut stream, mut reader) = raw_stream(&server);

    stream.write_all(b"*2\r\n$3\r\nFOO\r\n").unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(20));
    stream.write_all(b"$3\r\nbar\r\n*1\r\n$4\r\nPING\r\n").unwrap();

    assert_eq!(read_line(&mut reader), "-ERR unknown command 'FOO'\r\n");
    assert_eq!(read_line(&mut reader), "+PONG\r\n");
}

#[test]
fn test_pipelined_command_after_unknown_one_still_runs() {
    let server = start_server(16);
    let mut client = client(&server);

    let mut pipeline = tidekv::protocol::encode_command(&["NOPE"]);
    pipeline.extend(tidekv::protocol::encode_command(&["ECHO", "still here"]));
    client.write_raw(&pipeline).unwrap();

    assert!(client.read_reply().unwrap().is_error());
    assert_eq!(client.read_reply().unwrap(), Reply::bulk_str("still here"));
}

#[test]
fn test_malformed_frame_then_recovery() {
    let server = start_server(16);
    let mut client = client(&server);

    client.write_raw(b"*1\r\n$x\r\n").unwrap();
    assert!(client.read_reply().unwrap().is_error());

    assert_eq!(client.send(&["ECHO", "ok"]).unwrap(), Reply::bulk_str("ok"));
}

#[test]
fn test_connection_limit() {
    let server = start_server(1);
    let mut first = client(&server);
    assert_eq!(first.send(&["PING"]).unwrap(), Reply::simple("PONG"));

    let (_stream, mut reader) = raw_stream(&server);
    assert_eq!(read_line(&mut reader), "-ERR max number of clients reached\r\n");

    // the first client is unaffected
    assert_eq!(first.send(&["PING"]).unwrap(), Reply::simple("PONG"));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_clients() {
    let server = start_server(64);
    let addr = server.addr;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            thread::spawn(move || {
                let mut client = Client::connect(addr).unwrap();
                let key = format!("key:{}", i);
                for round in 0..20 {
                    let value = format!("{}-{}", i, round);
                    assert_eq!(client.send(&["SET", key.as_str(), value.as_str()]).unwrap(), Reply::ok());
                    assert_eq!(client.send(&["GET", key.as_str()]).unwrap(), Reply::bulk_str(&value));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut client = client(&server);
    let Reply::Array(keys) = client.send(&["KEYS", "key:*"]).unwrap() else {
        panic!("KEYS should return an array");
    };
    assert_eq!(keys.len(), 8);
}

#[test]
fn test_blocking_xread_across_connections() {
    let server = start_server(16);
    let mut reader = client(&server);
    let addr = server.addr;

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let mut client = Client::connect(addr).unwrap();
        client.send(&["XADD", "events", "*", "kind", "click"]).unwrap()
    });

    let reply = reader
        .send(&["XREAD", "BLOCK", "2000", "STREAMS", "events", "$"])
        .unwrap();
    let id = writer.join().unwrap();

    let Reply::Array(streams) = reply else {
        panic!("expected entries, got {:?}", reply);
    };
    let Reply::Array(ref stream) = streams[0] else {
        panic!("expected a stream reply");
    };
    assert_eq!(stream[0], Reply::bulk_str("events"));
    let Reply::Array(ref entries) = stream[1] else {
        panic!("expected entries");
    };
    let Reply::Array(ref entry) = entries[0] else {
        panic!("expected an entry");
    };
    assert_eq!(entry[0], id);
}

#[test]
fn test_shutdown_handle_stops_accepting() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().port(0).snapshot_dir(temp.path()).build();
    let mut server = Server::new(config);
    let addr = server.bind().unwrap();
    let shutdown = server.shutdown_handle();
    let handle = thread::spawn(move || server.run());

    let mut client = Client::connect(addr).unwrap();
    assert_eq!(client.send(&["PING"]).unwrap(), Reply::simple("PONG"));

    shutdown.store(true, Ordering::Release);
    assert!(handle.join().unwrap().is_ok());

    // the listener is gone once run() returns
    thread::sleep(Duration::from_millis(20));
    let refused = TcpStream::connect(addr).map(|mut s| {
        let mut buf = [0u8; 1];
        s.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        s.read(&mut buf)
    });
    assert!(!matches!(refused, Ok(Ok(n)) if n > 0));
}
