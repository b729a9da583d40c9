use crate::commands::{Args, CommandError};
use crate::resp;
use crate::store::Store;

/// Lists live keys matching a glob pattern.
#[derive(Debug, PartialEq)]
pub struct Keys {
    pub pattern: String,
}

impl Keys {
    pub fn parse(mut args: Args) -> Result<Keys, CommandError> {
        let pattern = args.next_string()?;
        Ok(Keys { pattern })
    }

    pub fn exec(self, store: &Store) -> Vec<u8> {
        let keys = store.keys(&self.pattern);
        let mut buf = Vec::new();
        resp::append_array(&mut buf, keys.len());
        for key in keys {
            resp::append_bulk_str(&mut buf, &key);
        }
        buf
    }
}
