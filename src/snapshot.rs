//! Binary snapshot container.
//!
//! Layout: `REDIS0011` magic, optional `0xFA` metadata pairs, one or more
//! `0xFE`-tagged database sections, `0xFF`, then a little-endian CRC-64
//! (ISO polynomial) over every preceding byte. Lengths use the two-bit
//! prefixed size encoding; string-typed values only.

use bytes::Bytes;
use crc::{Crc, CRC_64_GO_ISO};
use thiserror::Error as ThisError;

const MAGIC: &[u8] = b"REDIS0011";

const METADATA_START: u8 = 0xFA;
const HASH_TABLE_START: u8 = 0xFB;
const EXPIRE_MILLIS: u8 = 0xFC;
const EXPIRE_SECS: u8 = 0xFD;
const DATABASE_START: u8 = 0xFE;
const END_OF_FILE: u8 = 0xFF;

const STRING_TYPE: u8 = 0x00;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("invalid snapshot header")]
    BadMagic,
    #[error("unsupported value type: {0:#04x}")]
    UnsupportedValueType(u8),
    #[error("unexpected byte {byte:#04x} at offset {at}")]
    UnexpectedByte { byte: u8, at: usize },
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("snapshot truncated")]
    Truncated,
    #[error("LZF-compressed strings are not supported")]
    LzfUnsupported,
}

/// One keyspace entry. `expires_at` is an absolute unix timestamp in
/// milliseconds; `None` means the key never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Bytes,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub index: usize,
    pub entries: Vec<Entry>,
}

/// Decodes a complete snapshot, verifying structure and the trailing
/// checksum. Fails without partial results on any malformation.
pub fn load(buf: &[u8]) -> Result<Vec<Database>, SnapshotError> {
    verify_checksum(buf)?;

    let mut r = Reader::new(buf);
    if r.take(MAGIC.len())? != MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    read_metadata(&mut r)?;

    let mut databases = Vec::new();
    loop {
        let at = r.pos;
        match r.u8()? {
            END_OF_FILE => break,
            DATABASE_START => databases.push(read_database(&mut r)?),
            byte => return Err(SnapshotError::UnexpectedByte { byte, at }),
        }
    }

    Ok(databases)
}

/// Encodes `databases` into a fresh snapshot, checksum included. The CRC
/// is computed over the in-memory buffer being built, so it always covers
/// exactly the bytes that precede it.
pub fn save(databases: &[Database]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);

    for db in databases {
        buf.push(DATABASE_START);
        write_size(&mut buf, db.index);
        buf.push(HASH_TABLE_START);
        let expires = db.entries.iter().filter(|e| e.expires_at.is_some()).count();
        write_size(&mut buf, db.entries.len());
        write_size(&mut buf, expires);
        for entry in &db.entries {
            write_entry(&mut buf, entry);
        }
    }

    buf.push(END_OF_FILE);
    let checksum = CRC64.checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

fn verify_checksum(buf: &[u8]) -> Result<(), SnapshotError> {
    if buf.len() < MAGIC.len() + 8 {
        return Err(SnapshotError::Truncated);
    }
    let (content, tail) = buf.split_at(buf.len() - 8);
    let stored = u64::from_le_bytes(tail.try_into().expect("8-byte checksum tail"));
    if CRC64.checksum(content) != stored {
        return Err(SnapshotError::ChecksumMismatch);
    }
    Ok(())
}

// Metadata pairs sit between the header and the first database section.
// The byte that ends the section belongs to whatever follows, so it is
// only peeked here.
fn read_metadata(r: &mut Reader) -> Result<Vec<(String, String)>, SnapshotError> {
    let mut metadata = Vec::new();
    loop {
        let at = r.pos;
        match r.u8()? {
            METADATA_START => {
                let key = String::from_utf8_lossy(r.size_string()?).into_owned();
                let value = String::from_utf8_lossy(r.size_string()?).into_owned();
                metadata.push((key, value));
            }
            DATABASE_START | END_OF_FILE => {
                r.pos = at;
                return Ok(metadata);
            }
            byte => return Err(SnapshotError::UnexpectedByte { byte, at }),
        }
    }
}

fn read_database(r: &mut Reader) -> Result<Database, SnapshotError> {
    let index = r.size()?;

    let at = r.pos;
    let marker = r.u8()?;
    if marker != HASH_TABLE_START {
        return Err(SnapshotError::UnexpectedByte { byte: marker, at });
    }

    let kv_count = r.size()?;
    let _expire_count = r.size()?;

    let mut entries = Vec::with_capacity(kv_count);
    for _ in 0..kv_count {
        entries.push(read_entry(r)?);
    }

    Ok(Database { index, entries })
}

fn read_entry(r: &mut Reader) -> Result<Entry, SnapshotError> {
    let mut type_byte = r.u8()?;

    let expires_at = match type_byte {
        EXPIRE_MILLIS => {
            let ms = i64::from_le_bytes(r.take(8)?.try_into().expect("8-byte expiry"));
            type_byte = r.u8()?;
            Some(ms)
        }
        EXPIRE_SECS => {
            // Second-resolution expiries widen verbatim; the field is
            // interpreted downstream exactly as stored.
            let secs = u32::from_le_bytes(r.take(4)?.try_into().expect("4-byte expiry"));
            type_byte = r.u8()?;
            Some(i64::from(secs))
        }
        _ => None,
    };

    if type_byte != STRING_TYPE {
        return Err(SnapshotError::UnsupportedValueType(type_byte));
    }

    let key = String::from_utf8_lossy(r.size_string()?).into_owned();
    let value = Bytes::copy_from_slice(r.size_string()?);

    Ok(Entry {
        key,
        value,
        expires_at,
    })
}

fn write_entry(buf: &mut Vec<u8>, entry: &Entry) {
    if let Some(ms) = entry.expires_at {
        buf.push(EXPIRE_MILLIS);
        buf.extend_from_slice(&ms.to_le_bytes());
    }
    buf.push(STRING_TYPE);
    write_string(buf, entry.key.as_bytes());
    write_string(buf, &entry.value);
}

// Two-bit prefixed size encoding: 6-bit inline, 14-bit big-endian split,
// or a 32-bit big-endian word.
fn write_size(buf: &mut Vec<u8>, size: usize) {
    if size < 64 {
        buf.push(size as u8);
    } else if size < 16384 {
        buf.push(0x40 | (size >> 8) as u8);
        buf.push((size & 0xFF) as u8);
    } else {
        buf.push(0x80);
        buf.extend_from_slice(&(size as u32).to_be_bytes());
    }
}

fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    write_size(buf, data.len());
    buf.extend_from_slice(data);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        if self.buf.len() - self.pos < n {
            return Err(SnapshotError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn size(&mut self) -> Result<usize, SnapshotError> {
        let at = self.pos;
        let b = self.u8()?;
        match b >> 6 {
            0b00 => Ok((b & 0x3F) as usize),
            0b01 => {
                let lo = self.u8()?;
                Ok(((b & 0x3F) as usize) << 8 | lo as usize)
            }
            0b10 => {
                let word = u32::from_be_bytes(self.take(4)?.try_into().expect("4-byte size"));
                Ok(word as usize)
            }
            _ => match b {
                // Integer-encoded strings: the payload is the literal
                // little-endian integer, so its length is the size.
                0xC0 => Ok(1),
                0xC1 => Ok(2),
                0xC2 => Ok(4),
                0xC3 => Err(SnapshotError::LzfUnsupported),
                byte => Err(SnapshotError::UnexpectedByte { byte, at }),
            },
        }
    }

    fn size_string(&mut self) -> Result<&'a [u8], SnapshotError> {
        let len = self.size()?;
        self.take(len)
    }
}
