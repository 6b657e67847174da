//! # Length Framing
//!
//! Byte-stream transports carry frames as `[len: u32 LE][payload]`. UDP-like
//! transports skip framing and are bounded by the effective MTU instead.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Refuse frames larger than this; a peer announcing more is misbehaving.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("frame length {0} exceeds limit")]
    Oversized(u32),
}

/// Prefix a payload with its 4-byte LE length.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 4);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

/// Incremental decoder over a reassembly buffer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed freshly received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FramingError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if len > MAX_FRAME_LEN {
            return Err(FramingError::Oversized(len));
        }
        if self.buf.len() < 4 + len as usize {
            return Ok(None);
        }
        self.buf.advance(4);
        Ok(Some(self.buf.split_to(len as usize).freeze()))
    }

    /// Bytes buffered but not yet framed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_single_frame() {
        let frame = encode_frame(b"hello");
        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_partial_then_complete() {
        let frame = encode_frame(b"abcdef");
        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame[..3]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&frame[3..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[test]
    fn test_two_frames_in_one_feed() {
        let mut data = encode_frame(b"one").to_vec();
        data.extend_from_slice(&encode_frame(b"two"));
        let mut decoder = FrameDecoder::new();
        decoder.feed(&data);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(decoder.next_frame().unwrap().unwrap(), Bytes::from_static(b"two"));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&(MAX_FRAME_LEN + 1).to_le_bytes());
        assert_eq!(
            decoder.next_frame().unwrap_err(),
            FramingError::Oversized(MAX_FRAME_LEN + 1)
        );
    }
}
