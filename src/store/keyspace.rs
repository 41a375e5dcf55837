//! Keyspace implementation
//!
//! HashMap-based store with a mutex for concurrency.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{Result, TideError};
use super::{now_ms, IdRequest, MemoryItem, Stream, StreamEntry, StreamId, Value, ValueKind};

/// The shared key-value store
#[derive(Debug, Default)]
pub struct Store {
    entries: Mutex<HashMap<String, MemoryItem>>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key
    pub fn set(&self, key: impl Into<String>, value: Value, expires_at_ms: u64) {
        self.entries
            .lock()
            .insert(key.into(), MemoryItem::new(value, expires_at_ms));
    }

    /// Live value of a key (expired keys are removed and reported absent)
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        live_item(&mut entries, key).map(|item| item.value.clone())
    }

    /// Kind of the live value at `key`
    pub fn kind(&self, key: &str) -> Option<ValueKind> {
        let mut entries = self.entries.lock();
        live_item(&mut entries, key).map(|item| item.value.kind())
    }

    /// Increment an existing integer by one
    ///
    /// The key must already exist; counters are not created implicitly.
    pub fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock();
        let item = live_item(&mut entries, key).ok_or(TideError::NoSuchKey)?;

        match &mut item.value {
            Value::Integer(current) => {
                let next = current.checked_add(1).ok_or(TideError::NotInteger)?;
                *current = next;
                Ok(next)
            }
            Value::String(_) => Err(TideError::NotInteger),
            Value::Stream(_) => Err(TideError::WrongType),
        }
    }

    /// Every live key
    pub fn keys(&self) -> Vec<String> {
        let now = now_ms();
        let mut entries = self.entries.lock();
        entries.retain(|_, item| !item.is_expired(now));
        entries.keys().cloned().collect()
    }

    /// Number of keys, including ones that expired but were not touched yet
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Append an entry to the stream at `key`, creating the stream if needed
    pub fn xadd(
        &self,
        key: &str,
        request: IdRequest,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId> {
        let mut entries = self.entries.lock();

        if live_item(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                MemoryItem::persistent(Value::Stream(Stream::new())),
            );
        }

        let item = entries
            .get_mut(key)
            .ok_or_else(|| TideError::StreamId("stream vanished during XADD".to_string()))?;
        let Value::Stream(stream) = &mut item.value else {
            return Err(TideError::WrongType);
        };

        let id = match stream.next_id(request, now_ms()) {
            Ok(id) => id,
            Err(e) => {
                if stream.is_empty() {
                    entries.remove(key);
                }
                return Err(e);
            }
        };
        stream.append(id, fields)?;
        Ok(id)
    }

    /// Entries of the stream at `key` within `[start, end]`
    ///
    /// A missing key reads as an empty stream.
    pub fn xrange(
        &self,
        key: &str,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
    ) -> Result<Vec<StreamEntry>> {
        self.with_stream(key, |stream| stream.range(start, end, count))
    }

    /// Entries of the stream at `key` strictly newer than `after`
    pub fn xread(&self, key: &str, after: StreamId, count: Option<usize>) -> Result<Vec<StreamEntry>> {
        self.with_stream(key, |stream| stream.after(after, count))
    }

    /// Top id of the stream at `key` (`0-0` when missing or empty)
    pub fn last_stream_id(&self, key: &str) -> Result<StreamId> {
        self.with_stream(key, |stream| stream.last_id().unwrap_or(StreamId::ZERO))
    }

    fn with_stream<T: Default>(&self, key: &str, f: impl FnOnce(&Stream) -> T) -> Result<T> {
        let mut entries = self.entries.lock();
        match live_item(&mut entries, key).map(|item| &item.value) {
            None => Ok(T::default()),
            Some(Value::Stream(stream)) => Ok(f(stream)),
            Some(_) => Err(TideError::WrongType),
        }
    }
}

/// Look up a key, dropping it first if it has expired
fn live_item<'a>(entries: &'a mut HashMap<String, MemoryItem>, key: &str) -> Option<&'a mut MemoryItem> {
    if entries.get(key).is_some_and(|item| item.is_expired(now_ms())) {
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}
