//! Length-prefixed frame codec for the UDS protocol.
//!
//! Each frame consists of:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Payload          |
//! +----------------------------+------------------+
//! ```
//!
//! The codec enforces bounded reads: the frame length is validated against
//! [`MAX_FRAME_SIZE`] (1 MiB) BEFORE any allocation, so a hostile length
//! prefix cannot exhaust memory.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum message size: 1 MiB. Receivers reject larger frames.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length of the frame header (4 bytes for the u32 length prefix).
const HEADER_LEN: usize = 4;

/// Errors from the frame codec.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Claimed or actual frame size.
        size: usize,
        /// Enforced maximum.
        max: usize,
    },

    /// Underlying transport error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame codec implementing length-prefixed framing for
/// [`tokio_util::codec::Framed`] streams.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FramingError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        // Validate before allocating.
        if length > MAX_FRAME_SIZE {
            return Err(FramingError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        let total_len = HEADER_LEN + length;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FramingError> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(FramingError::FrameTooLarge {
                size: item.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(HEADER_LEN + item.len());
        #[allow(clippy::cast_possible_truncation)] // Validated above
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), FramingError> {
        self.encode(Bytes::from(item), dst)
    }
}
