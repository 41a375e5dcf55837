//! Stream Tests
//!
//! Tests for stream id generation, range queries and blocked reads.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tidekv::store::{BlockingReads, IdRequest, Store, Stream, StreamId, Value, WakeReason};
use tidekv::TideError;

fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(f, v)| (f.to_string(), v.to_string()))
        .collect()
}

fn id(text: &str) -> StreamId {
    text.parse().unwrap()
}

// =============================================================================
// Id Parsing Tests
// =============================================================================

#[test]
fn test_parse_ids() {
    assert_eq!(id("5-3"), StreamId::new(5, 3));
    assert_eq!(StreamId::new(5, 3).to_string(), "5-3");
    assert!("5".parse::<StreamId>().is_err());
    assert!("a-1".parse::<StreamId>().is_err());

    assert_eq!("*".parse::<IdRequest>().unwrap(), IdRequest::Auto);
    assert_eq!("7-*".parse::<IdRequest>().unwrap(), IdRequest::AutoSeq(7));
    assert_eq!("7-2".parse::<IdRequest>().unwrap(), IdRequest::Explicit(StreamId::new(7, 2)));
    assert_eq!("7".parse::<IdRequest>().unwrap(), IdRequest::Explicit(StreamId::new(7, 0)));
}

#[test]
fn test_range_bounds() {
    assert_eq!(StreamId::parse_range_start("-").unwrap(), StreamId::ZERO);
    assert_eq!(StreamId::parse_range_end("+").unwrap(), StreamId::MAX);
    assert_eq!(StreamId::parse_range_start("9").unwrap(), StreamId::new(9, 0));
    assert_eq!(StreamId::parse_range_end("9").unwrap(), StreamId::new(9, u64::MAX));
}

// =============================================================================
// Id Generation Tests
// =============================================================================

#[test]
fn test_explicit_ids_must_increase() {
    let store = Store::new();
    assert_eq!(
        store.xadd("s", IdRequest::Explicit(id("1-1")), fields(&[("a", "1")])).unwrap(),
        id("1-1")
    );

    let err = store
        .xadd("s", IdRequest::Explicit(id("1-1")), fields(&[("a", "2")]))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "The ID specified in XADD is equal or smaller than the target stream top item"
    );

    let err = store
        .xadd("s", IdRequest::Explicit(id("0-5")), fields(&[("a", "3")]))
        .unwrap_err();
    assert!(matches!(err, TideError::StreamId(_)));
}

#[test]
fn test_zero_id_is_rejected() {
    let store = Store::new();
    let err = store
        .xadd("s", IdRequest::Explicit(StreamId::ZERO), fields(&[("a", "1")]))
        .unwrap_err();
    assert_eq!(err.to_string(), "The ID specified in XADD must be greater than 0-0");

    // a failed first XADD does not leave an empty stream behind
    assert_eq!(store.get("s"), None);
}

#[test]
fn test_auto_sequence() {
    let stream = Stream::new();
    assert_eq!(stream.next_id(IdRequest::AutoSeq(0), 0).unwrap(), id("0-1"));
    assert_eq!(stream.next_id(IdRequest::AutoSeq(5), 0).unwrap(), id("5-0"));

    let store = Store::new();
    store.xadd("s", IdRequest::AutoSeq(5), fields(&[("a", "1")])).unwrap();
    assert_eq!(
        store.xadd("s", IdRequest::AutoSeq(5), fields(&[("a", "2")])).unwrap(),
        id("5-1")
    );
    assert!(store.xadd("s", IdRequest::AutoSeq(4), fields(&[("a", "3")])).is_err());
}

#[test]
fn test_auto_id_uses_clock_and_never_goes_backwards() {
    let stream = Stream::new();
    assert_eq!(stream.next_id(IdRequest::Auto, 1_000).unwrap(), id("1000-0"));

    let mut stream = Stream::new();
    stream.append(id("2000-4"), fields(&[("a", "1")])).unwrap();
    assert_eq!(stream.next_id(IdRequest::Auto, 1_000).unwrap(), id("2000-5"));
    assert_eq!(stream.next_id(IdRequest::Auto, 3_000).unwrap(), id("3000-0"));
}

#[test]
fn test_xadd_on_string_is_wrong_type() {
    let store = Store::new();
    store.set("k", Value::from_input("v"), 0);
    assert!(matches!(
        store.xadd("k", IdRequest::Auto, fields(&[("a", "1")])),
        Err(TideError::WrongType)
    ));
}

// =============================================================================
// Range Query Tests
// =============================================================================

fn sample_store() -> Store {
    let store = Store::new();
    for (entry_id, value) in [("1-0", "a"), ("1-1", "b"), ("2-0", "c"), ("3-5", "d")] {
        store
            .xadd("s", IdRequest::Explicit(id(entry_id)), fields(&[("v", value)]))
            .unwrap();
    }
    store
}

#[test]
fn test_xrange_inclusive() {
    let store = sample_store();

    let all = store.xrange("s", StreamId::ZERO, StreamId::MAX, None).unwrap();
    assert_eq!(all.len(), 4);

    let middle = store.xrange("s", id("1-1"), id("2-0"), None).unwrap();
    let ids: Vec<String> = middle.iter().map(|e| e.id.to_string()).collect();
    assert_eq!(ids, vec!["1-1", "2-0"]);

    let by_ms = store
        .xrange(
            "s",
            StreamId::parse_range_start("1").unwrap(),
            StreamId::parse_range_end("1").unwrap(),
            None,
        )
        .unwrap();
    assert_eq!(by_ms.len(), 2);

    let limited = store.xrange("s", StreamId::ZERO, StreamId::MAX, Some(3)).unwrap();
    assert_eq!(limited.len(), 3);

    assert!(store.xrange("missing", StreamId::ZERO, StreamId::MAX, None).unwrap().is_empty());
}

#[test]
fn test_xread_is_exclusive() {
    let store = sample_store();

    let newer = store.xread("s", id("1-1"), None).unwrap();
    let ids: Vec<String> = newer.iter().map(|e| e.id.to_string()).collect();
    assert_eq!(ids, vec!["2-0", "3-5"]);

    assert!(store.xread("s", id("3-5"), None).unwrap().is_empty());
    assert_eq!(store.last_stream_id("s").unwrap(), id("3-5"));
    assert_eq!(store.last_stream_id("missing").unwrap(), StreamId::ZERO);
}

// =============================================================================
// Blocked Read Tests
// =============================================================================

#[test]
fn test_blocked_read_times_out() {
    let blocking = BlockingReads::new();
    let waiter = blocking.register(vec!["s".to_string()]);

    let started = Instant::now();
    let reason = waiter.wait(Some(Instant::now() + Duration::from_millis(50)));

    assert_eq!(reason, WakeReason::TimedOut);
    assert!(started.elapsed() >= Duration::from_millis(45));
}

#[test]
fn test_notify_wakes_matching_waiter_only() {
    let blocking = Arc::new(BlockingReads::new());
    let waiter = blocking.register(vec!["a".to_string(), "b".to_string()]);

    assert_eq!(blocking.notify("other"), 0);
    assert_eq!(blocking.notify("b"), 1);
    assert_eq!(waiter.wait(None), WakeReason::Woken);
}

#[test]
fn test_notify_from_another_thread() {
    let blocking = Arc::new(BlockingReads::new());
    let waiter = blocking.register(vec!["s".to_string()]);

    let notifier = Arc::clone(&blocking);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        notifier.notify("s")
    });

    let reason = waiter.wait(Some(Instant::now() + Duration::from_secs(5)));
    assert_eq!(reason, WakeReason::Woken);
    assert_eq!(handle.join().unwrap(), 1);
}

#[test]
fn test_dropping_waiter_unregisters() {
    let blocking = BlockingReads::new();
    {
        let _first = blocking.register(vec!["s".to_string()]);
        let _second = blocking.register(vec!["s".to_string()]);
        assert_eq!(blocking.pending(), 2);
    }
    assert_eq!(blocking.pending(), 0);
    assert_eq!(blocking.notify("s"), 0);
}
