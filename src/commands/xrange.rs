use bytes::Bytes;

use crate::commands::{error_reply, Args, CommandError};
use crate::resp;
use crate::store::stream::{StreamEntry, StreamId};
use crate::store::Store;

/// `XRANGE key start end`, inclusive on both bounds. `-` and `+` denote
/// the smallest and largest possible IDs.
#[derive(Debug, PartialEq)]
pub struct Xrange {
    pub key: String,
    pub start: Bytes,
    pub end: Bytes,
}

impl Xrange {
    pub fn parse(mut args: Args) -> Result<Xrange, CommandError> {
        let key = args.next_string()?;
        let start = args.next_bytes()?;
        let end = args.next_bytes()?;
        Ok(Xrange { key, start, end })
    }

    pub fn exec(self, store: &Store) -> Vec<u8> {
        let bounds = StreamId::parse_bound(&self.start, false)
            .and_then(|start| Ok((start, StreamId::parse_bound(&self.end, true)?)));
        let (start, end) = match bounds {
            Ok(bounds) => bounds,
            Err(err) => return error_reply(&err.to_string()),
        };

        match store.stream_range(&self.key, start, end) {
            Ok(entries) => {
                let mut buf = Vec::new();
                resp::append_array(&mut buf, entries.len());
                for entry in &entries {
                    append_entry(&mut buf, entry);
                }
                buf
            }
            Err(err) => error_reply(&err.to_string()),
        }
    }
}

/// `[id, [field, value, field, value, ...]]` (shared with XREAD).
pub(crate) fn append_entry(buf: &mut Vec<u8>, entry: &StreamEntry) {
    resp::append_array(buf, 2);
    resp::append_bulk_str(buf, &entry.id.to_string());
    resp::append_array(buf, entry.fields.len() * 2);
    for (field, value) in &entry.fields {
        resp::append_bulk_str(buf, field);
        resp::append_bulk_str(buf, value);
    }
}
