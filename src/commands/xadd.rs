use bytes::Bytes;

use crate::commands::{error_reply, Args, CommandError};
use crate::resp;
use crate::store::Store;
use crate::store::stream::pair_fields;

/// `XADD key id field value [field value ...]`
///
/// The ID may be `*`, `<ms>-*`, or explicit `<ms>-<seq>`; the assigned ID
/// is returned as a bulk string.
#[derive(Debug, PartialEq)]
pub struct Xadd {
    pub key: String,
    pub id: Bytes,
    pub fields: Vec<Bytes>,
}

impl Xadd {
    pub fn parse(mut args: Args) -> Result<Xadd, CommandError> {
        let key = args.next_string()?;
        let id = args.next_bytes()?;
        let fields = args.rest();
        if fields.is_empty() {
            return Err(CommandError::WrongArity("xadd"));
        }
        Ok(Xadd { key, id, fields })
    }

    pub fn exec(self, store: &Store) -> Vec<u8> {
        let fields = match pair_fields(&self.fields) {
            Ok(fields) => fields,
            Err(err) => return error_reply(&err.to_string()),
        };

        match store.add_stream_entry(&self.key, &self.id, fields) {
            Ok(id) => {
                let mut buf = Vec::new();
                resp::append_bulk_str(&mut buf, &id.to_string());
                buf
            }
            Err(err) => error_reply(&err.to_string()),
        }
    }
}
