use crate::commands::{Args, CommandError};
use crate::resp;
use crate::store::Store;

#[derive(Debug, PartialEq)]
pub struct Get {
    pub key: String,
}

impl Get {
    pub fn parse(mut args: Args) -> Result<Get, CommandError> {
        let key = args.next_string()?;
        Ok(Get { key })
    }

    pub fn exec(self, store: &Store) -> Vec<u8> {
        let mut buf = Vec::new();
        match store.get(&self.key) {
            Some(value) => resp::append_bulk(&mut buf, &value),
            None => resp::append_null_bulk(&mut buf),
        }
        buf
    }
}
