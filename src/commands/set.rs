use bytes::Bytes;

use crate::commands::{Args, CommandError};
use crate::resp;
use crate::store::Store;

/// `SET key value [PX milliseconds]`
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Bytes,
    pub ttl_ms: i64,
}

impl Set {
    pub fn parse(mut args: Args) -> Result<Set, CommandError> {
        let key = args.next_string()?;
        let value = args.next_bytes()?;

        let mut ttl_ms = 0;
        while let Some(option) = args.try_next_bytes() {
            match option.to_ascii_lowercase().as_slice() {
                b"px" => {
                    ttl_ms = args.next_i64()?;
                    if ttl_ms <= 0 {
                        return Err(CommandError::Syntax);
                    }
                }
                _ => return Err(CommandError::Syntax),
            }
        }

        Ok(Set { key, value, ttl_ms })
    }

    pub fn exec(self, store: &Store) -> Vec<u8> {
        store.set(self.key, self.value, self.ttl_ms);
        let mut buf = Vec::new();
        resp::append_ok(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::raw;

    #[test]
    fn plain_set() {
        let store = Store::new();

        let cmd = Set::parse(Args::new("set", raw(&["SET", "foo", "bar"]))).unwrap();
        assert_eq!(cmd.ttl_ms, 0);
        assert_eq!(cmd.exec(&store), b"+OK\r\n");

        assert_eq!(store.get("foo"), Some(Bytes::from("bar")));
    }

    #[test]
    fn px_option_sets_a_ttl() {
        let cmd = Set::parse(Args::new("set", raw(&["SET", "k", "v", "PX", "250"]))).unwrap();

        assert_eq!(cmd.ttl_ms, 250);
    }

    #[test]
    fn px_is_case_insensitive() {
        let cmd = Set::parse(Args::new("set", raw(&["SET", "k", "v", "px", "250"]))).unwrap();

        assert_eq!(cmd.ttl_ms, 250);
    }

    #[test]
    fn rejects_unknown_options_and_bad_ttls() {
        assert_eq!(
            Set::parse(Args::new("set", raw(&["SET", "k", "v", "EX", "10"]))),
            Err(CommandError::Syntax)
        );
        assert_eq!(
            Set::parse(Args::new("set", raw(&["SET", "k", "v", "PX", "-5"]))),
            Err(CommandError::Syntax)
        );
        assert_eq!(
            Set::parse(Args::new("set", raw(&["SET", "k", "v", "PX", "soon"]))),
            Err(CommandError::NotInteger)
        );
    }

    #[test]
    fn missing_value_is_an_arity_error() {
        assert_eq!(
            Set::parse(Args::new("set", raw(&["SET", "k"]))),
            Err(CommandError::WrongArity("set"))
        );
    }
}
