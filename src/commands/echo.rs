use crate::commands::{Args, CommandError};
use crate::resp;

/// Returns its argument as a simple string.
#[derive(Debug, PartialEq)]
pub struct Echo {
    pub message: String,
}

impl Echo {
    pub fn parse(mut args: Args) -> Result<Echo, CommandError> {
        let message = args.next_string()?;
        Ok(Echo { message })
    }

    pub fn exec(self) -> Vec<u8> {
        let mut buf = Vec::new();
        resp::append_simple(&mut buf, &self.message);
        buf
    }
}
