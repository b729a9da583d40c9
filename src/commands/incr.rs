use crate::commands::{error_reply, Args, CommandError};
use crate::resp;
use crate::store::Store;

/// Increments the decimal string at `key` by one, treating a missing key
/// as zero.
#[derive(Debug, PartialEq)]
pub struct Incr {
    pub key: String,
}

impl Incr {
    pub fn parse(mut args: Args) -> Result<Incr, CommandError> {
        let key = args.next_string()?;
        Ok(Incr { key })
    }

    pub fn exec(self, store: &Store) -> Vec<u8> {
        match store.incr(&self.key) {
            Ok(value) => {
                let mut buf = Vec::new();
                resp::append_int(&mut buf, value);
                buf
            }
            Err(err) => error_reply(&err.to_string()),
        }
    }
}
