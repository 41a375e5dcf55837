//! Stream values
//!
//! An append-only log of entries ordered by `ms-seq` ids.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TideError};
use crate::protocol::Reply;

/// Stream entry id, ordered by (millis, sequence)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Lower range bound: `-`, `ms` (sequence 0) or `ms-seq`
    pub fn parse_range_start(input: &str) -> Result<Self> {
        match input {
            "-" => Ok(Self::ZERO),
            _ => Self::parse_with_default_seq(input, 0),
        }
    }

    /// Upper range bound: `+`, `ms` (every sequence) or `ms-seq`
    pub fn parse_range_end(input: &str) -> Result<Self> {
        match input {
            "+" => Ok(Self::MAX),
            _ => Self::parse_with_default_seq(input, u64::MAX),
        }
    }

    fn parse_with_default_seq(input: &str, default_seq: u64) -> Result<Self> {
        match input.split_once('-') {
            Some(_) => input.parse(),
            None => Ok(Self::new(parse_part(input)?, default_seq)),
        }
    }
}

impl FromStr for StreamId {
    type Err = TideError;

    fn from_str(input: &str) -> Result<Self> {
        let (ms, seq) = input.split_once('-').ok_or_else(invalid_id)?;
        Ok(Self::new(parse_part(ms)?, parse_part(seq)?))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

fn parse_part(part: &str) -> Result<u64> {
    part.parse::<u64>().map_err(|_| invalid_id())
}

fn invalid_id() -> TideError {
    TideError::StreamId("Invalid stream ID specified as stream command argument".to_string())
}

/// Id argument of XADD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRequest {
    /// `*`: current time, next free sequence
    Auto,
    /// `ms-*`: given millis, next free sequence
    AutoSeq(u64),
    /// `ms-seq` (or bare `ms`, sequence 0)
    Explicit(StreamId),
}

impl FromStr for IdRequest {
    type Err = TideError;

    fn from_str(input: &str) -> Result<Self> {
        if input == "*" {
            return Ok(IdRequest::Auto);
        }
        match input.split_once('-') {
            Some((ms, "*")) => Ok(IdRequest::AutoSeq(parse_part(ms)?)),
            Some(_) => Ok(IdRequest::Explicit(input.parse()?)),
            None => Ok(IdRequest::Explicit(StreamId::new(parse_part(input)?, 0))),
        }
    }
}

/// One stream entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    /// `[id, [field, value, ...]]`
    pub fn to_reply(&self) -> Reply {
        let fields = self
            .fields
            .iter()
            .flat_map(|(field, value)| [field.as_str(), value.as_str()]);
        Reply::Array(vec![
            Reply::bulk_str(&self.id.to_string()),
            Reply::bulk_array(fields),
        ])
    }
}

/// Append-only sequence of entries with strictly increasing ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stream {
    entries: Vec<StreamEntry>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> Option<StreamId> {
        self.entries.last().map(|entry| entry.id)
    }

    /// Resolve an XADD id request against the current top entry
    pub fn next_id(&self, request: IdRequest, now_ms: u64) -> Result<StreamId> {
        let last = self.last_id();

        let id = match request {
            IdRequest::Explicit(id) => {
                if id == StreamId::ZERO {
                    return Err(TideError::StreamId(
                        "The ID specified in XADD must be greater than 0-0".to_string(),
                    ));
                }
                id
            }
            IdRequest::AutoSeq(ms) => Self::next_seq(last, ms)?,
            // clock going backwards reuses the top entry's millis
            IdRequest::Auto => {
                let ms = last.map_or(now_ms, |top| now_ms.max(top.ms));
                Self::next_seq(last, ms)?
            }
        };

        if matches!(last, Some(top) if id <= top) {
            return Err(too_small());
        }
        Ok(id)
    }

    fn next_seq(last: Option<StreamId>, ms: u64) -> Result<StreamId> {
        match last {
            Some(top) if top.ms == ms => top
                .seq
                .checked_add(1)
                .map(|seq| StreamId::new(ms, seq))
                .ok_or_else(too_small),
            Some(top) if top.ms > ms => Err(too_small()),
            _ if ms == 0 => Ok(StreamId::new(0, 1)),
            _ => Ok(StreamId::new(ms, 0)),
        }
    }

    /// Append an entry whose id came from `next_id`
    pub fn append(&mut self, id: StreamId, fields: Vec<(String, String)>) -> Result<()> {
        if matches!(self.last_id(), Some(top) if id <= top) {
            return Err(too_small());
        }
        self.entries.push(StreamEntry { id, fields });
        Ok(())
    }

    /// Entries with `start <= id <= end`
    pub fn range(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        if start > end {
            return Vec::new();
        }
        let from = self.entries.partition_point(|entry| entry.id < start);
        let to = self.entries.partition_point(|entry| entry.id <= end);
        take_count(&self.entries[from..to], count)
    }

    /// Entries with `id > after`
    pub fn after(&self, after: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        let from = self.entries.partition_point(|entry| entry.id <= after);
        take_count(&self.entries[from..], count)
    }
}

fn take_count(entries: &[StreamEntry], count: Option<usize>) -> Vec<StreamEntry> {
    let limit = count.unwrap_or(entries.len()).min(entries.len());
    entries[..limit].to_vec()
}

fn too_small() -> TideError {
    TideError::StreamId(
        "The ID specified in XADD is equal or smaller than the target stream top item".to_string(),
    )
}
