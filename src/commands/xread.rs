use bytes::Bytes;
use tokio::time::{self, Duration, Instant};

use crate::commands::xrange::append_entry;
use crate::commands::{error_reply, Args, CommandError};
use crate::resp;
use crate::store::stream::{StreamEntry, StreamId};
use crate::store::Store;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// `XREAD [BLOCK ms] STREAMS key [key ...] id [id ...]`
///
/// Reads entries with IDs strictly greater than the given start. `$`
/// starts from the stream's current head. With BLOCK the command polls
/// until an entry shows up or the deadline passes; BLOCK 0 never gives up.
#[derive(Debug, PartialEq)]
pub struct Xread {
    pub block_ms: Option<i64>,
    pub keys: Vec<String>,
    pub ids: Vec<Bytes>,
}

impl Xread {
    pub fn parse(mut args: Args) -> Result<Xread, CommandError> {
        let mut block_ms = None;

        loop {
            let token = args.next_bytes()?;
            match token.to_ascii_lowercase().as_slice() {
                b"block" => block_ms = Some(args.next_i64()?),
                b"streams" => break,
                _ => return Err(CommandError::Syntax),
            }
        }

        let rest = args.rest();
        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(CommandError::Syntax);
        }
        let (keys, ids) = rest.split_at(rest.len() / 2);
        Ok(Xread {
            block_ms,
            keys: keys
                .iter()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .collect(),
            ids: ids.to_vec(),
        })
    }

    pub async fn exec(self, store: &Store) -> Vec<u8> {
        // Resolve the start for every stream once, up front. `$` pins to
        // the head as of now; entries equal to the start are filtered out
        // to make the read exclusive.
        let mut starts = Vec::with_capacity(self.keys.len());
        for (key, raw_id) in self.keys.iter().zip(&self.ids) {
            if store.value_type(key) != "stream" {
                return error_reply("ERR key is not a stream");
            }
            let start = if raw_id.as_ref() == b"$" {
                match store.stream_last_id(key) {
                    Ok(id) => id,
                    Err(err) => return error_reply(&err.to_string()),
                }
            } else {
                match StreamId::parse_bound(raw_id, false) {
                    Ok(id) => id,
                    Err(err) => return error_reply(&err.to_string()),
                }
            };
            starts.push(start);
        }

        let deadline = match self.block_ms {
            Some(ms) if ms > 0 => Some(Instant::now() + Duration::from_millis(ms as u64)),
            _ => None,
        };

        loop {
            let mut results: Vec<(&String, Vec<StreamEntry>)> = Vec::new();
            for (key, start) in self.keys.iter().zip(&starts) {
                let entries = match store.stream_range(key, *start, StreamId::MAX) {
                    Ok(entries) => entries,
                    Err(err) => return error_reply(&err.to_string()),
                };
                let entries: Vec<StreamEntry> =
                    entries.into_iter().filter(|e| e.id != *start).collect();
                if !entries.is_empty() {
                    results.push((key, entries));
                }
            }

            if !results.is_empty() {
                let mut buf = Vec::new();
                resp::append_array(&mut buf, results.len());
                for (key, entries) in &results {
                    resp::append_array(&mut buf, 2);
                    resp::append_bulk_str(&mut buf, key);
                    resp::append_array(&mut buf, entries.len());
                    for entry in entries {
                        append_entry(&mut buf, entry);
                    }
                }
                return buf;
            }

            match self.block_ms {
                None => break,
                Some(_) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            break;
                        }
                    }
                    time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        let mut buf = Vec::new();
        resp::append_null_array(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::raw;

    fn seed(store: &Store) {
        for id in ["1-1", "1-2"] {
            store
                .add_stream_entry("s", id.as_bytes(), vec![("k".to_string(), "v".to_string())])
                .unwrap();
        }
    }

    #[test]
    fn parse_block_and_streams() {
        let cmd = Xread::parse(Args::new(
            "xread",
            raw(&["XREAD", "BLOCK", "500", "STREAMS", "a", "b", "1-0", "2-0"]),
        ))
        .unwrap();

        assert_eq!(cmd.block_ms, Some(500));
        assert_eq!(cmd.keys, vec!["a", "b"]);
        assert_eq!(cmd.ids.len(), 2);
    }

    #[test]
    fn parse_rejects_unbalanced_streams() {
        let err = Xread::parse(Args::new(
            "xread",
            raw(&["XREAD", "STREAMS", "a", "b", "1-0"]),
        ))
        .unwrap_err();

        assert_eq!(err, CommandError::Syntax);
    }

    #[tokio::test]
    async fn start_is_exclusive() {
        let store = Store::new();
        seed(&store);

        let cmd = Xread::parse(Args::new("xread", raw(&["XREAD", "STREAMS", "s", "1-1"]))).unwrap();
        let reply = cmd.exec(&store).await;

        // Only 1-2 qualifies.
        let expected = b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nk\r\n$1\r\nv\r\n";
        assert_eq!(reply, &expected[..]);
    }

    #[tokio::test]
    async fn no_new_entries_without_block_is_null() {
        let store = Store::new();
        seed(&store);

        let cmd = Xread::parse(Args::new("xread", raw(&["XREAD", "STREAMS", "s", "1-2"]))).unwrap();

        assert_eq!(cmd.exec(&store).await, b"*-1\r\n");
    }

    #[tokio::test]
    async fn block_times_out_to_null() {
        let store = Store::new();
        seed(&store);

        let cmd = Xread::parse(Args::new(
            "xread",
            raw(&["XREAD", "BLOCK", "30", "STREAMS", "s", "$"]),
        ))
        .unwrap();

        let started = Instant::now();
        let reply = cmd.exec(&store).await;

        assert_eq!(reply, b"*-1\r\n");
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn block_wakes_on_new_entry() {
        let store = Store::new();
        seed(&store);

        let cmd = Xread::parse(Args::new(
            "xread",
            raw(&["XREAD", "BLOCK", "1000", "STREAMS", "s", "$"]),
        ))
        .unwrap();

        let writer = store.clone();
        let handle = tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            writer
                .add_stream_entry("s", b"2-0", vec![("k".to_string(), "w".to_string())])
                .unwrap();
        });

        let reply = cmd.exec(&store).await;
        handle.await.unwrap();

        assert!(reply.starts_with(b"*1\r\n"));
        let text = String::from_utf8_lossy(&reply).into_owned();
        assert!(text.contains("2-0"));
    }
}
