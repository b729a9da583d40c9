use crate::commands::{Args, CommandError};
use crate::resp;
use crate::store::Store;

#[derive(Debug, PartialEq)]
pub struct Type {
    pub key: String,
}

impl Type {
    pub fn parse(mut args: Args) -> Result<Type, CommandError> {
        let key = args.next_string()?;
        Ok(Type { key })
    }

    pub fn exec(self, store: &Store) -> Vec<u8> {
        let mut buf = Vec::new();
        resp::append_simple(&mut buf, store.value_type(&self.key));
        buf
    }
}
