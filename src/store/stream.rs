use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum StreamError {
    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidId,
    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    IdIsZero,
    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    IdTooSmall,
    #[error("ERR wrong number of arguments for XADD")]
    BadFields,
}

/// Stream entry identifier: a millisecond timestamp and a sequence number,
/// ordered as the pair. Parsing bounds and IDs into this form keeps range
/// scans numeric; the canonical `"ms-seq"` rendering has variable-width
/// decimals, so byte order and numeric order disagree across digit counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId {
    pub ms: i64,
    pub seq: i64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: i64::MAX,
        seq: i64::MAX,
    };

    /// Parses an explicit `"ms-seq"` ID.
    pub fn parse(raw: &[u8]) -> Result<StreamId, StreamError> {
        let raw = std::str::from_utf8(raw).map_err(|_| StreamError::InvalidId)?;
        let (ms, seq) = raw.split_once('-').ok_or(StreamError::InvalidId)?;
        let ms = ms.parse::<i64>().map_err(|_| StreamError::InvalidId)?;
        let seq = seq.parse::<i64>().map_err(|_| StreamError::InvalidId)?;
        if ms < 0 || seq < 0 {
            return Err(StreamError::InvalidId);
        }
        Ok(StreamId { ms, seq })
    }

    /// Parses a range bound. `-` and `+` are the minimum and maximum
    /// possible IDs; a bare millisecond value gets the smallest sequence at
    /// the start of a range and the largest at the end.
    pub fn parse_bound(raw: &[u8], end: bool) -> Result<StreamId, StreamError> {
        match raw {
            b"-" => Ok(StreamId::MIN),
            b"+" => Ok(StreamId::MAX),
            raw if !raw.contains(&b'-') => {
                let ms = std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .filter(|ms| *ms >= 0)
                    .ok_or(StreamError::InvalidId)?;
                let seq = if end { i64::MAX } else { 0 };
                Ok(StreamId { ms, seq })
            }
            raw => StreamId::parse(raw),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
}

/// Append-only log of field-value entries with strictly increasing IDs,
/// indexed for inclusive range scans.
#[derive(Debug, Default)]
pub struct StreamValue {
    entries: BTreeMap<StreamId, Vec<(String, String)>>,
    last_id: StreamId,
}

impl StreamValue {
    pub fn new() -> StreamValue {
        StreamValue::default()
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Resolves an ID argument (`*`, `<ms>-*`, or explicit), validates it
    /// against the stream head, and appends the entry. Returns the
    /// assigned ID.
    pub fn add(
        &mut self,
        raw_id: &[u8],
        fields: Vec<(String, String)>,
        now_ms: i64,
    ) -> Result<StreamId, StreamError> {
        let id = self.resolve_id(raw_id, now_ms)?;
        self.validate(id)?;
        self.entries.insert(id, fields);
        self.last_id = id;
        Ok(id)
    }

    /// Inclusive scan over `[start, end]` in ascending ID order. An
    /// inverted range is empty.
    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        if start > end {
            return Vec::new();
        }
        self.entries
            .range((Bound::Included(start), Bound::Included(end)))
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    fn resolve_id(&self, raw: &[u8], now_ms: i64) -> Result<StreamId, StreamError> {
        if raw == b"*" {
            return Ok(self.auto_id(now_ms));
        }
        match raw.strip_suffix(b"-*") {
            Some(ms) => {
                let ms = std::str::from_utf8(ms)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .filter(|ms| *ms >= 0)
                    .ok_or(StreamError::InvalidId)?;
                Ok(self.auto_id(ms))
            }
            None => StreamId::parse(raw),
        }
    }

    // Auto-assigned sequence: continue the current millisecond, otherwise
    // start at zero. Millisecond zero floors at one so (0,0) stays
    // unreachable.
    fn auto_id(&self, ms: i64) -> StreamId {
        let mut seq = if ms == self.last_id.ms {
            self.last_id.seq + 1
        } else {
            0
        };
        if ms == 0 {
            seq = seq.max(1);
        }
        StreamId { ms, seq }
    }

    fn validate(&self, id: StreamId) -> Result<(), StreamError> {
        if id == StreamId::MIN {
            return Err(StreamError::IdIsZero);
        }
        if id <= self.last_id {
            return Err(StreamError::IdTooSmall);
        }
        Ok(())
    }
}

/// Pairs up an alternating field/value argument list.
pub fn pair_fields<T: AsRef<[u8]>>(raw: &[T]) -> Result<Vec<(String, String)>, StreamError> {
    if raw.len() % 2 != 0 {
        return Err(StreamError::BadFields);
    }
    Ok(raw
        .chunks_exact(2)
        .map(|kv| {
            (
                String::from_utf8_lossy(kv[0].as_ref()).into_owned(),
                String::from_utf8_lossy(kv[1].as_ref()).into_owned(),
            )
        })
        .collect())
}
