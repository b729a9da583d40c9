pub mod config;
pub mod echo;
pub mod get;
pub mod incr;
pub mod info;
pub mod keys;
pub mod ping;
pub mod save;
pub mod set;
pub mod type_;
pub mod xadd;
pub mod xrange;
pub mod xread;

use std::vec;

use bytes::Bytes;
use thiserror::Error as ThisError;

use crate::resp;

/// Commands whose successful execution mutates the keyspace and therefore
/// must be propagated to connected replicas.
pub fn is_write(name: &str) -> bool {
    matches!(name, "set" | "incr" | "xadd")
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error("ERR syntax error")]
    Syntax,
}

/// Walks a command's argument list. The command-name argument itself is
/// skipped on construction; running out of arguments surfaces as a wrong
/// arity error naming the command.
pub struct Args {
    name: &'static str,
    parts: vec::IntoIter<Bytes>,
}

impl Args {
    pub fn new(name: &'static str, args: Vec<Bytes>) -> Args {
        let mut parts = args.into_iter();
        parts.next();
        Args { name, parts }
    }

    pub fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        self.parts.next().ok_or(CommandError::WrongArity(self.name))
    }

    pub fn next_string(&mut self) -> Result<String, CommandError> {
        Ok(String::from_utf8_lossy(&self.next_bytes()?).into_owned())
    }

    pub fn next_i64(&mut self) -> Result<i64, CommandError> {
        self.next_string()?
            .parse()
            .map_err(|_| CommandError::NotInteger)
    }

    /// Like `next_bytes`, but absence is not an error. For trailing
    /// options.
    pub fn try_next_bytes(&mut self) -> Option<Bytes> {
        self.parts.next()
    }

    pub fn rest(&mut self) -> Vec<Bytes> {
        self.parts.by_ref().collect()
    }
}

pub(crate) fn error_reply(message: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    resp::append_error(&mut buf, message);
    buf
}

#[cfg(test)]
pub(crate) fn raw(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}
