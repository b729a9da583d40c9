use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::resp::{self, ParseError};
use crate::Error;

/// One fully framed client command: its arguments and the exact number of
/// bytes it occupied on the wire. Replicas feed `wire_len` into their
/// replication offset, which must count consumed bytes, not arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wire {
    pub args: Vec<Bytes>,
    pub wire_len: usize,
}

pub struct CommandCodec;

impl Decoder for CommandCodec {
    type Item = Wire;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (args, consumed) = match resp::parse_command(&src[..]) {
            Ok((args, rest)) => {
                let consumed = src.len() - rest.len();
                // The parsed slices borrow from `src`; copy them out before
                // the buffer is trimmed.
                let args = args.iter().map(|a| Bytes::copy_from_slice(a)).collect();
                (args, consumed)
            }
            Err(ParseError::Incomplete) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        src.advance(consumed);

        Ok(Some(Wire {
            args,
            wire_len: consumed,
        }))
    }
}
