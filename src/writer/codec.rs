//! Binary encoding of recoverable state
//!
//! ## Layout (little-endian)
//!
//! ```text
//! [magic: 4][version: u8][flags: u8][reserved: u16][body_len: u32]
//! [body: body_len bytes]
//! [crc32(body): u32]
//! ```
//!
//! Resume body: `final_blob, position: u64, count: u32, ids: 16 * count`.
//! Commit body: `final_blob, count: u32, ids: 16 * count`.
//! `final_blob` is two length-prefixed (u32) UTF-8 strings, bucket then
//! object. Resume flag bit 0 is `closed`.
//!
//! Readers accept any version from 1 upward and ignore body bytes past the
//! fields they know, so later versions may only append to the body.

use crate::blob::BlobIdentifier;
use crate::writer::state::{CommitState, ResumeState};
use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

const RESUME_MAGIC: &[u8; 4] = b"BSRS";
const COMMIT_MAGIC: &[u8; 4] = b"BSCS";

/// Version written by this build
pub const FORMAT_VERSION: u8 = 1;

const HEADER_SIZE: usize = 12;
const CHECKSUM_SIZE: usize = 4;

const FLAG_CLOSED: u8 = 0b0000_0001;

/// Failure to decode a serialized state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("bad magic: expected {expected:?}, got {actual:?}")]
    BadMagic { expected: [u8; 4], actual: [u8; 4] },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid blob identifier: {0}")]
    InvalidBlob(String),
}

/// Versioned binary serializer for one state type
pub trait StateSerializer<T> {
    /// Format version written by `serialize`
    fn version(&self) -> u8;

    fn serialize(&self, state: &T) -> Vec<u8>;

    fn deserialize(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// Serializer for `ResumeState`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeStateSerializer;

/// Serializer for `CommitState`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStateSerializer;

impl StateSerializer<ResumeState> for ResumeStateSerializer {
    fn version(&self) -> u8 {
        FORMAT_VERSION
    }

    fn serialize(&self, state: &ResumeState) -> Vec<u8> {
        let mut body = BytesMut::new();
        put_blob(&mut body, state.final_blob());
        body.put_u64_le(state.position());
        put_ids(&mut body, state.component_ids());

        let flags = if state.is_closed() { FLAG_CLOSED } else { 0 };
        frame(RESUME_MAGIC, flags, &body)
    }

    fn deserialize(&self, data: &[u8]) -> Result<ResumeState, CodecError> {
        let (flags, mut body) = unframe(RESUME_MAGIC, data)?;
        let final_blob = get_blob(&mut body)?;
        ensure(&body, 8)?;
        let position = body.get_u64_le();
        let ids = get_ids(&mut body)?;

        Ok(ResumeState::new(
            final_blob,
            ids,
            position,
            flags & FLAG_CLOSED != 0,
        ))
    }
}

impl StateSerializer<CommitState> for CommitStateSerializer {
    fn version(&self) -> u8 {
        FORMAT_VERSION
    }

    fn serialize(&self, state: &CommitState) -> Vec<u8> {
        let mut body = BytesMut::new();
        put_blob(&mut body, state.final_blob());
        put_ids(&mut body, state.component_ids());
        frame(COMMIT_MAGIC, 0, &body)
    }

    fn deserialize(&self, data: &[u8]) -> Result<CommitState, CodecError> {
        let (_flags, mut body) = unframe(COMMIT_MAGIC, data)?;
        let final_blob = get_blob(&mut body)?;
        let ids = get_ids(&mut body)?;
        Ok(CommitState::new(final_blob, ids))
    }
}

fn frame(magic: &[u8; 4], flags: u8, body: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(HEADER_SIZE + body.len() + CHECKSUM_SIZE);
    out.put_slice(magic);
    out.put_u8(FORMAT_VERSION);
    out.put_u8(flags);
    out.put_u16_le(0); // reserved
    out.put_u32_le(body.len() as u32);
    out.put_slice(body);
    out.put_u32_le(crc32fast::hash(body));
    out.to_vec()
}

/// Validate header and checksum; returns flags and the body
fn unframe<'a>(magic: &[u8; 4], data: &'a [u8]) -> Result<(u8, &'a [u8]), CodecError> {
    let mut header = data;
    ensure(&header, HEADER_SIZE)?;

    let mut actual = [0u8; 4];
    header.copy_to_slice(&mut actual);
    if &actual != magic {
        return Err(CodecError::BadMagic {
            expected: *magic,
            actual,
        });
    }

    let version = header.get_u8();
    if version == 0 {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let flags = header.get_u8();
    let _reserved = header.get_u16_le();
    let body_len = header.get_u32_le() as usize;

    ensure(&header, body_len.saturating_add(CHECKSUM_SIZE))?;
    let (body, mut trailer) = header.split_at(body_len);
    let expected = trailer.get_u32_le();
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    Ok((flags, body))
}

fn ensure(buf: &&[u8], needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut &[u8]) -> Result<String, CodecError> {
    ensure(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    ensure(buf, len)?;
    let (s, rest) = buf.split_at(len);
    *buf = rest;
    String::from_utf8(s.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

fn put_blob(buf: &mut BytesMut, blob: &BlobIdentifier) {
    put_str(buf, blob.bucket());
    put_str(buf, blob.object());
}

fn get_blob(buf: &mut &[u8]) -> Result<BlobIdentifier, CodecError> {
    let bucket = get_str(buf)?;
    let object = get_str(buf)?;
    BlobIdentifier::new(bucket, object).map_err(|e| CodecError::InvalidBlob(e.to_string()))
}

fn put_ids(buf: &mut BytesMut, ids: &[Uuid]) {
    buf.put_u32_le(ids.len() as u32);
    for id in ids {
        buf.put_slice(id.as_bytes());
    }
}

fn get_ids(buf: &mut &[u8]) -> Result<Vec<Uuid>, CodecError> {
    ensure(buf, 4)?;
    let count = buf.get_u32_le() as usize;
    ensure(buf, count.saturating_mul(16))?;

    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let mut raw = [0u8; 16];
        buf.copy_to_slice(&mut raw);
        ids.push(Uuid::from_bytes(raw));
    }
    Ok(ids)
}
