//! Frame struct with typed accessors.
//!
//! A frame is one discrete message on the data channel: an optional
//! payload and an optional control flag, possibly both at once.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use dcstream::protocol::{Flag, Frame};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Some(Flag::Fin), Some(Bytes::from_static(b"bye")));
//! assert_eq!(frame.flag(), Some(Flag::Fin));
//! assert_eq!(frame.payload(), Some(&b"bye"[..]));
//! ```

use bytes::Bytes;

use super::wire_format::{Flag, Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Control flag, if any.
    pub flag: Option<Flag>,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Option<Bytes>,
}

impl Frame {
    pub fn new(flag: Option<Flag>, payload: Option<Bytes>) -> Self {
        Self { flag, payload }
    }

    /// A data-only frame.
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self {
            flag: None,
            payload: Some(payload.into()),
        }
    }

    /// A control-only frame.
    pub fn control(flag: Flag) -> Self {
        Self {
            flag: Some(flag),
            payload: None,
        }
    }

    #[inline]
    pub fn flag(&self) -> Option<Flag> {
        self.flag
    }

    #[inline]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Header describing this frame on the wire.
    pub fn header(&self) -> Header {
        Header::new(self.flag, self.payload.as_ref().map(|p| wire_length(p.len())))
    }

    /// Total encoded size (header + payload).
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.as_ref().map_or(0, Bytes::len)
    }
}

/// Payload length as carried in the header.
///
/// Lengths past `u32::MAX` saturate, which any receiver rejects as
/// oversized instead of misreading the following bytes as a new frame.
fn wire_length(len: usize) -> u32 {
    debug_assert!(u32::try_from(len).is_ok(), "payload of {len} bytes exceeds one frame");
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Build a complete frame as a single byte vector.
///
/// The writer task uses scatter/gather I/O instead; this is for tests and
/// callers that need a contiguous buffer.
///
/// # Example
///
/// ```
/// use dcstream::protocol::{build_frame, Frame, HEADER_SIZE};
///
/// let bytes = build_frame(&Frame::data(&b"hello"[..]));
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame.encoded_len());
    buf.extend_from_slice(&frame.header().encode());
    if let Some(payload) = &frame.payload {
        buf.extend_from_slice(payload);
    }
    buf
}
