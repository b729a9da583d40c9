pub mod stream;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use glob_match::glob_match;
use thiserror::Error as ThisError;
use tokio::time::{self, Duration};
use tracing::debug;

use crate::snapshot::Entry;
use crate::store::stream::{StreamEntry, StreamError, StreamId, StreamValue};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum StoreError {
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR no such key")]
    Missing,
    #[error("{0}")]
    Stream(#[from] StreamError),
}

/// A keyspace value. String expiry is an absolute unix-millisecond
/// timestamp; zero means the key never expires. Streams do not expire.
#[derive(Debug)]
pub enum Value {
    String { data: Bytes, expires_at: i64 },
    Stream(StreamValue),
}

/// Handle to one keyspace. Cheap to clone; every clone shares the same
/// underlying map. Readers take the shared lock and copy bytes out before
/// returning; writers (and expired-key reaping) take the exclusive lock.
#[derive(Clone, Default)]
pub struct Store {
    state: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    items: HashMap<String, Value>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    /// Wakes every minute and drops expired entries. Runs until the store
    /// is gone; meant to be spawned once per keyspace.
    pub fn spawn_sweeper(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                time::sleep(SWEEP_INTERVAL).await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    debug!(removed, "swept expired keys");
                }
            }
        });
    }

    pub fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut state = self.state.write().unwrap();
        let before = state.items.len();
        state.items.retain(|_, value| match value {
            Value::String { expires_at, .. } => is_live(*expires_at, now),
            Value::Stream(_) => true,
        });
        before - state.items.len()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = now_ms();
        {
            let state = self.state.read().unwrap();
            match state.items.get(key) {
                Some(Value::String { data, expires_at }) if is_live(*expires_at, now) => {
                    return Some(data.clone());
                }
                Some(Value::String { .. }) => {} // expired; reap below
                _ => return None,
            }
        }

        // The key looked expired under the shared lock. Re-check under the
        // exclusive lock before removing; a writer may have replaced it.
        let mut state = self.state.write().unwrap();
        if let Some(Value::String { expires_at, .. }) = state.items.get(key) {
            if !is_live(*expires_at, now_ms()) {
                state.items.remove(key);
            }
        }
        None
    }

    /// `ttl_ms == 0` stores without expiry; positive values expire the key
    /// `ttl_ms` milliseconds from now. Overwrites a value of any type.
    pub fn set(&self, key: String, value: Bytes, ttl_ms: i64) {
        let expires_at = if ttl_ms > 0 { now_ms() + ttl_ms } else { 0 };
        let mut state = self.state.write().unwrap();
        state.items.insert(
            key,
            Value::String {
                data: value,
                expires_at,
            },
        );
    }

    /// Parses the current value as a signed 64-bit decimal (absent or
    /// expired counts as zero), adds one, stores the result back as a
    /// decimal string and returns it. The expiry, if any, is preserved.
    pub fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = now_ms();
        let mut state = self.state.write().unwrap();

        let (current, expires_at) = match state.items.get(key) {
            Some(Value::String { data, expires_at }) if is_live(*expires_at, now) => {
                let parsed = std::str::from_utf8(data)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or(StoreError::NotInteger)?;
                (parsed, *expires_at)
            }
            Some(Value::String { .. }) | None => (0, 0),
            Some(Value::Stream(_)) => return Err(StoreError::WrongType),
        };

        let next = current.checked_add(1).ok_or(StoreError::NotInteger)?;
        state.items.insert(
            key.to_string(),
            Value::String {
                data: Bytes::from(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    pub fn value_type(&self, key: &str) -> &'static str {
        let now = now_ms();
        let state = self.state.read().unwrap();
        match state.items.get(key) {
            Some(Value::String { expires_at, .. }) if is_live(*expires_at, now) => "string",
            Some(Value::Stream(_)) => "stream",
            _ => "none",
        }
    }

    /// Live keys matching a glob pattern (`*`, `?`, `[...]`).
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let now = now_ms();
        let state = self.state.read().unwrap();
        state
            .items
            .iter()
            .filter(|(_, value)| match value {
                Value::String { expires_at, .. } => is_live(*expires_at, now),
                Value::Stream(_) => true,
            })
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Replaces whatever the key holds with an empty stream.
    pub fn set_stream(&self, key: String) {
        let mut state = self.state.write().unwrap();
        state.items.insert(key, Value::Stream(StreamValue::new()));
    }

    /// Appends an entry to the stream at `key`, creating the stream when
    /// the key is absent. Returns the assigned ID.
    pub fn add_stream_entry(
        &self,
        key: &str,
        raw_id: &[u8],
        fields: Vec<(String, String)>,
    ) -> Result<StreamId, StoreError> {
        let now = now_ms();
        let mut state = self.state.write().unwrap();
        match state.items.get_mut(key) {
            Some(Value::Stream(stream)) => return Ok(stream.add(raw_id, fields, now)?),
            Some(Value::String { expires_at, .. }) if is_live(*expires_at, now) => {
                return Err(StoreError::WrongType);
            }
            // Absent, or an expired string nobody reaped yet.
            _ => {}
        }
        let mut stream = StreamValue::new();
        let id = stream.add(raw_id, fields, now)?;
        state.items.insert(key.to_string(), Value::Stream(stream));
        Ok(id)
    }

    /// Inclusive range scan over a stream. An absent key is an empty
    /// stream.
    pub fn stream_range(
        &self,
        key: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let now = now_ms();
        let state = self.state.read().unwrap();
        match state.items.get(key) {
            Some(Value::Stream(stream)) => Ok(stream.range(start, end)),
            Some(Value::String { expires_at, .. }) if is_live(*expires_at, now) => {
                Err(StoreError::WrongType)
            }
            _ => Ok(Vec::new()),
        }
    }

    pub fn stream_last_id(&self, key: &str) -> Result<StreamId, StoreError> {
        let now = now_ms();
        let state = self.state.read().unwrap();
        match state.items.get(key) {
            Some(Value::Stream(stream)) => Ok(stream.last_id()),
            Some(Value::String { expires_at, .. }) if is_live(*expires_at, now) => {
                Err(StoreError::WrongType)
            }
            _ => Err(StoreError::Missing),
        }
    }

    /// Snapshot of every live string entry. Streams have no value type in
    /// the snapshot format and are skipped.
    pub fn export(&self) -> Vec<Entry> {
        let now = now_ms();
        let state = self.state.read().unwrap();
        state
            .items
            .iter()
            .filter_map(|(key, value)| match value {
                Value::String { data, expires_at } if is_live(*expires_at, now) => Some(Entry {
                    key: key.clone(),
                    value: data.clone(),
                    expires_at: (*expires_at > 0).then_some(*expires_at),
                }),
                _ => None,
            })
            .collect()
    }

    /// Bulk-inserts snapshot entries, expiries taken verbatim.
    pub fn load(&self, entries: Vec<Entry>) {
        let mut state = self.state.write().unwrap();
        for entry in entries {
            state.items.insert(
                entry.key,
                Value::String {
                    data: entry.value,
                    expires_at: entry.expires_at.unwrap_or(0),
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_live(expires_at: i64, now: i64) -> bool {
    expires_at == 0 || now <= expires_at
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}
