//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the message format of the data channel:
//! - 6-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with optional flag and payload

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    presence, Flag, Header, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE,
};
