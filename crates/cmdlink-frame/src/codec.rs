use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::encoding::Encoding;
use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Frame header: a single big-endian `u64` envelope length.
pub const HEADER_SIZE: usize = 8;

/// Default maximum envelope size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Append one frame (length prefix + envelope bytes) to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────────────┐
/// │ Length (8B BE)   │ Envelope (Length bytes)  │
/// └──────────────────┴──────────────────────────┘
/// ```
pub fn encode_frame(envelope: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + envelope.len());
    dst.put_u64(envelope.len() as u64);
    dst.put_slice(envelope);
}

/// Split one frame's envelope bytes off the front of `src`.
///
/// Returns `Ok(None)` while `src` doesn't hold a complete frame yet; nothing
/// is consumed in that case.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let len = check_length(u64::from_be_bytes(header), max_payload)?;

    if src.len() - HEADER_SIZE < len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(len).freeze()))
}

/// Encode `envelope` with `encoding` and append it as one frame.
pub fn encode_envelope(envelope: &Envelope, encoding: Encoding, dst: &mut BytesMut) -> Result<()> {
    let bytes = encoding.encode(envelope)?;
    encode_frame(&bytes, dst);
    Ok(())
}

/// Decode one framed envelope off the front of `src`.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    match decode_frame(src, max_payload)? {
        Some(bytes) => Encoding::decode(&bytes).map(Some),
        None => Ok(None),
    }
}

/// Validate a wire length against the configured cap.
pub(crate) fn check_length(len: u64, max_payload: usize) -> Result<usize> {
    match usize::try_from(len) {
        Ok(len) if len <= max_payload => Ok(len),
        _ => Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        }),
    }
}

/// Configuration for framed streams.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum envelope size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
    /// Encoding used for outgoing envelopes.
    pub encoding: Encoding,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
            encoding: Encoding::default(),
        }
    }
}
