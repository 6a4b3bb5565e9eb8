//! Length-prefixed envelopes for stream sockets.
//!
//! Stream sockets coalesce and split writes freely. Every payload handed to
//! `send` is wrapped as:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────┐
//! │ Magic (2B)   │ Length (4B)  │ Payload          │
//! │ 0x4D 0x58    │ little-endian│ (Length bytes)   │
//! │ "MX"         │              │                  │
//! └──────────────┴──────────────┴──────────────────┘
//! ```
//!
//! so the receiving side can hand the connection exactly one chunk per send.

use std::io::{ErrorKind, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Envelope header: magic (2) + length (4) = 6 bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 6;

/// Magic bytes: "MX" (0x4D 0x58).
pub const MAGIC: [u8; 2] = [0x4D, 0x58];

/// Default maximum envelope payload: 16 MiB.
pub const DEFAULT_MAX_ENVELOPE: usize = 16 * 1024 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Wrap `payload` in an envelope.
pub fn encode_envelope(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(TransportError::EnvelopeTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(ENVELOPE_HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Take one complete envelope off the front of `src`.
///
/// Returns `Ok(None)` if `src` doesn't hold a complete envelope yet.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < ENVELOPE_HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if payload_len > max_payload {
        return Err(TransportError::EnvelopeTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < ENVELOPE_HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(ENVELOPE_HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Reads complete envelope payloads from any `Read` stream.
///
/// Handles partial reads internally.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: Read> EnvelopeReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_max_payload(inner, DEFAULT_MAX_ENVELOPE)
    }

    pub fn with_max_payload(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
        }
    }

    /// Read the next complete payload (blocking).
    ///
    /// Returns `Ok(None)` on a clean EOF between envelopes.
    pub fn read_envelope(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(payload) = decode_envelope(&mut self.buf, self.max_payload)? {
                return Ok(Some(payload));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream closed mid-envelope",
                )));
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }
}
