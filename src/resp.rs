// https://redis.io/docs/reference/protocol-spec

use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ParseError {
    #[error("not enough data is available to parse an entire command")]
    Incomplete,
    #[error("{0}")]
    Malformed(#[from] MalformedKind),
}

#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum MalformedKind {
    #[error("protocol error; expected '*'")]
    ExpectedArrayTag,
    #[error("protocol error; expected \\r\\n")]
    ExpectedCRLF,
    #[error("protocol error; invalid length")]
    BadCount,
    #[error("protocol error; negative array length not allowed")]
    NegativeArrayLen,
    #[error("protocol error; expected '$'")]
    ExpectedBulkTag,
}

/// Parses one command frame from the front of `input`.
///
/// Clients frame commands as arrays of bulk strings:
/// `*<count>\r\n` followed by `count` entries of `$<len>\r\n<payload>\r\n`.
/// On success the parsed arguments borrow from `input` and the unconsumed
/// tail is returned alongside them, so a caller can keep a single growable
/// buffer and trim it as frames complete. A well-formed zero-length array
/// yields an empty argument vector.
///
/// `Incomplete` means the frame may still become valid with more bytes;
/// `Malformed` means it never will.
pub fn parse_command(input: &[u8]) -> Result<(Vec<&[u8]>, &[u8]), ParseError> {
    if input.is_empty() {
        return Err(ParseError::Incomplete);
    }
    if input[0] != b'*' {
        return Err(MalformedKind::ExpectedArrayTag.into());
    }

    let (count, mut rest) = parse_length(&input[1..])?;
    if count < 0 {
        return Err(MalformedKind::NegativeArrayLen.into());
    }

    // The count is attacker-controlled; reserve conservatively and let the
    // vector grow if a frame really has that many arguments.
    let mut args = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let (arg, tail) = parse_bulk(rest)?;
        args.push(arg);
        rest = tail;
    }
    Ok((args, rest))
}

// `$<len>\r\n<payload>\r\n`
fn parse_bulk(input: &[u8]) -> Result<(&[u8], &[u8]), ParseError> {
    if input.is_empty() {
        return Err(ParseError::Incomplete);
    }
    if input[0] != b'$' {
        return Err(MalformedKind::ExpectedBulkTag.into());
    }
    let (len, rest) = parse_length(&input[1..])?;
    if len < 0 {
        return Err(MalformedKind::BadCount.into());
    }
    let len = len as usize;
    if rest.len() < len + CRLF.len() {
        return Err(ParseError::Incomplete);
    }
    if &rest[len..len + 2] != CRLF {
        return Err(MalformedKind::ExpectedCRLF.into());
    }
    Ok((&rest[..len], &rest[len + 2..]))
}

// Decimal integer terminated by \r\n. The digits may be signed; anything
// else before the terminator is a malformed count.
fn parse_length(input: &[u8]) -> Result<(i64, &[u8]), ParseError> {
    let pos = match input.iter().position(|&b| b == b'\n') {
        Some(pos) => pos,
        None => return Err(ParseError::Incomplete),
    };
    if pos == 0 || input[pos - 1] != b'\r' {
        return Err(MalformedKind::ExpectedCRLF.into());
    }
    let digits = std::str::from_utf8(&input[..pos - 1]).map_err(|_| MalformedKind::BadCount)?;
    let n = digits.parse::<i64>().map_err(|_| MalformedKind::BadCount)?;
    Ok((n, &input[pos + 1..]))
}

// Reply encoders. All of them append to a caller-owned buffer so replies
// for pipelined commands can share one allocation.

pub fn append_simple(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'+');
    append_line_safe(buf, s);
    buf.extend_from_slice(CRLF);
}

pub fn append_error(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'-');
    append_line_safe(buf, s);
    buf.extend_from_slice(CRLF);
}

pub fn append_int(buf: &mut Vec<u8>, n: i64) {
    buf.push(b':');
    buf.extend_from_slice(n.to_string().as_bytes());
    buf.extend_from_slice(CRLF);
}

pub fn append_uint(buf: &mut Vec<u8>, n: u64) {
    buf.push(b':');
    buf.extend_from_slice(n.to_string().as_bytes());
    buf.extend_from_slice(CRLF);
}

pub fn append_array(buf: &mut Vec<u8>, count: usize) {
    buf.push(b'*');
    buf.extend_from_slice(count.to_string().as_bytes());
    buf.extend_from_slice(CRLF);
}

pub fn append_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

pub fn append_bulk_str(buf: &mut Vec<u8>, s: &str) {
    append_bulk(buf, s.as_bytes());
}

pub fn append_null_bulk(buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"$-1\r\n");
}

pub fn append_null_array(buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"*-1\r\n");
}

pub fn append_ok(buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"+OK\r\n");
}

/// Serializes `args` as an array of bulk strings, the framing used both by
/// clients and by the master-to-replica command stream.
pub fn encode_command<I, A>(args: I) -> Vec<u8>
where
    I: IntoIterator<Item = A>,
    A: AsRef<[u8]>,
{
    let args: Vec<A> = args.into_iter().collect();
    let mut buf = Vec::new();
    append_array(&mut buf, args.len());
    for arg in &args {
        append_bulk(&mut buf, arg.as_ref());
    }
    buf
}

// Simple strings and errors are line-oriented; embedded terminators would
// desynchronize the stream, so they are replaced with spaces.
fn append_line_safe(buf: &mut Vec<u8>, s: &str) {
    for b in s.bytes() {
        if b == b'\r' || b == b'\n' {
            buf.push(b' ');
        } else {
            buf.push(b);
        }
    }
}
