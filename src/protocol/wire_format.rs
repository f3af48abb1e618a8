//! Wire format encoding and decoding.
//!
//! Implements the 6-byte frame header:
//! ```text
//! ┌──────────┬───────┬──────────┐
//! │ Presence │ Flag  │ Length   │
//! │ 1 byte   │ 1 byte│ 4 bytes  │
//! │          │       │ uint32 BE│
//! └──────────┴───────┴──────────┘
//! ```
//!
//! The presence byte says whether the frame carries a control flag and/or
//! a payload. The flag byte is only meaningful when `HAS_FLAG` is set.

use std::fmt;

use crate::error::{Result, StreamError};

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Default maximum size of a whole message on the channel (header + payload).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Default maximum payload carried by a single frame.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = (DEFAULT_MAX_MESSAGE_SIZE - HEADER_SIZE) as u32;

/// Presence bits.
pub mod presence {
    /// Frame carries a control flag.
    pub const HAS_FLAG: u8 = 0b0000_0001;
    /// Frame carries a payload (possibly empty).
    pub const HAS_PAYLOAD: u8 = 0b0000_0010;

    /// Reserved bits mask (bits 2-7).
    pub const RESERVED_MASK: u8 = 0b1111_1100;

    /// Check if a specific bit is set.
    #[inline]
    pub fn has(presence: u8, bit: u8) -> bool {
        presence & bit != 0
    }
}

/// Stream control flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flag {
    /// Sender will send no more data.
    Fin = 0,
    /// Sender asks the receiver to stop sending data.
    StopSending = 1,
    /// Abort both directions immediately.
    Reset = 2,
}

impl Flag {
    /// Wire code of this flag.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Flag::Fin),
            1 => Some(Flag::StopSending),
            2 => Some(Flag::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Fin => f.write_str("FIN"),
            Flag::StopSending => f.write_str("STOP_SENDING"),
            Flag::Reset => f.write_str("RESET"),
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Presence byte (see `presence` module).
    pub presence: u8,
    /// Raw flag code, valid only with `HAS_FLAG`.
    pub flag: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a header for a frame with the given flag and payload length.
    ///
    /// `payload_length` of `None` means the frame carries no payload at all.
    pub fn new(flag: Option<Flag>, payload_length: Option<u32>) -> Self {
        let mut presence = 0;
        if flag.is_some() {
            presence |= presence::HAS_FLAG;
        }
        if payload_length.is_some() {
            presence |= presence::HAS_PAYLOAD;
        }
        Self {
            presence,
            flag: flag.map(Flag::code).unwrap_or(0),
            payload_length: payload_length.unwrap_or(0),
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use dcstream::protocol::{Flag, Header};
    ///
    /// let header = Header::new(Some(Flag::Fin), Some(5));
    /// let bytes = header.encode();
    /// assert_eq!(bytes, [0x03, 0, 0, 0, 0, 5]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.presence;
        buf[1] = self.flag;
        buf[2..6].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            presence: buf[0],
            flag: buf[1],
            payload_length: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Reserved presence bits are 0
    /// - Flag code is known when `HAS_FLAG` is set
    /// - No length without `HAS_PAYLOAD`
    /// - Payload length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.presence & presence::RESERVED_MASK != 0 {
            return Err(StreamError::Protocol(
                "Reserved presence bits must be 0".to_string(),
            ));
        }

        if self.has_flag() && Flag::from_code(self.flag).is_none() {
            return Err(StreamError::Protocol(format!(
                "Unknown flag code {}",
                self.flag
            )));
        }

        if !self.has_payload() && self.payload_length != 0 {
            return Err(StreamError::Protocol(
                "Payload length set on a frame without payload".to_string(),
            ));
        }

        if self.payload_length > max_payload_size {
            return Err(StreamError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn has_flag(&self) -> bool {
        presence::has(self.presence, presence::HAS_FLAG)
    }

    #[inline]
    pub fn has_payload(&self) -> bool {
        presence::has(self.presence, presence::HAS_PAYLOAD)
    }

    /// The decoded flag, if present and known.
    #[inline]
    pub fn flag(&self) -> Option<Flag> {
        if self.has_flag() {
            Flag::from_code(self.flag)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        let header = Header::new(None, Some(0));
        assert_eq!(header.encode().len(), HEADER_SIZE);
        assert_eq!(HEADER_SIZE, 6);
    }

    #[test]
    fn test_encode_data_frame() {
        let header = Header::new(None, Some(0x0102_0304));
        assert_eq!(header.encode(), [0x02, 0x00, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_encode_control_frame() {
        let header = Header::new(Some(Flag::StopSending), None);
        assert_eq!(header.encode(), [0x01, 0x01, 0, 0, 0, 0]);
        assert_eq!(header.flag(), Some(Flag::StopSending));
        assert!(!header.has_payload());
    }

    #[test]
    fn test_decode_too_short() {
        assert!(Header::decode(&[0x02, 0, 0]).is_none());
    }

    #[test]
    fn test_decode_fields() {
        let header = Header::decode(&[0x03, 0x02, 0, 0, 0, 9]).unwrap();
        assert!(header.has_flag());
        assert!(header.has_payload());
        assert_eq!(header.flag(), Some(Flag::Reset));
        assert_eq!(header.payload_length, 9);
    }

    #[test]
    fn test_validate_reserved_bits() {
        let header = Header::decode(&[0x80, 0, 0, 0, 0, 0]).unwrap();
        let err = header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("Reserved"));
    }

    #[test]
    fn test_validate_unknown_flag() {
        let header = Header::decode(&[0x01, 7, 0, 0, 0, 0]).unwrap();
        let err = header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("Unknown flag code 7"));
    }

    #[test]
    fn test_validate_length_without_payload() {
        let header = Header::decode(&[0x01, 0, 0, 0, 0, 4]).unwrap();
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());
    }

    #[test]
    fn test_validate_max_payload() {
        let header = Header::new(None, Some(101));
        assert!(header.validate(100).is_err());
        assert!(header.validate(101).is_ok());
    }

    #[test]
    fn test_flag_ignored_without_presence_bit() {
        let header = Header::decode(&[0x02, 0x01, 0, 0, 0, 0]).unwrap();
        assert_eq!(header.flag(), None);
    }

    #[test]
    fn test_flag_codes() {
        for flag in [Flag::Fin, Flag::StopSending, Flag::Reset] {
            assert_eq!(Flag::from_code(flag.code()), Some(flag));
        }
        assert_eq!(Flag::from_code(3), None);
        assert_eq!(Flag::StopSending.to_string(), "STOP_SENDING");
    }
}
