//! Wire format encoding and decoding.
//!
//! Implements the 22-byte frame header:
//! ```text
//! ┌──────┬──────────┬──────────┬───────┐
//! │ Type │ Length   │ Id       │ End   │
//! │ 1 B  │ 4 bytes  │ 16 bytes │ 1 B   │
//! │ enum │ uint32 BE│ UUID     │ 0 | 1 │
//! └──────┴──────────┴──────────┴───────┘
//! ```
//!
//! The header is versionless. Both peers must agree on the maximum frame size;
//! a declared length above it is a malformed frame.

use uuid::Uuid;

use crate::error::{Result, StreamwireError};

/// Header size in bytes (fixed, exactly 22).
pub const HEADER_SIZE: usize = 22;

/// Default maximum payload bytes carried by a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 4096;

/// Kind of logical message a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Control frames of a request.
    Request = b'A',
    /// Control frames of a response.
    Response = b'B',
    /// Body bytes of a stream attached to a request or response.
    Stream = b'S',
}

impl FrameType {
    /// Wire byte for this type.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'A' => Some(FrameType::Request),
            b'B' => Some(FrameType::Response),
            b'S' => Some(FrameType::Stream),
            _ => None,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// What kind of logical message this fragment belongs to.
    pub frame_type: FrameType,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// Correlation id of the exchange or stream.
    pub id: Uuid,
    /// Last fragment for this id.
    pub end: bool,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(frame_type: FrameType, id: Uuid, payload_length: u32, end: bool) -> Self {
        Self {
            frame_type,
            payload_length,
            id,
            end,
        }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use streamwire::protocol::{FrameHeader, FrameType, HEADER_SIZE};
    /// use uuid::Uuid;
    ///
    /// let header = FrameHeader::new(FrameType::Request, Uuid::nil(), 100, true);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(bytes[0], b'A');
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (22 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.frame_type.as_byte();
        buf[1..5].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[5..21].copy_from_slice(self.id.as_bytes());
        buf[21] = u8::from(self.end);
    }

    /// Decode header from bytes.
    ///
    /// Fails with `MalformedFrame` if the buffer is too short, the type byte is
    /// unknown or the end byte is neither 0 nor 1.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StreamwireError::MalformedFrame(format!(
                "Header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let frame_type = FrameType::from_byte(buf[0]).ok_or_else(|| {
            StreamwireError::MalformedFrame(format!("Unknown frame type 0x{:02x}", buf[0]))
        })?;

        let end = match buf[21] {
            0 => false,
            1 => true,
            other => {
                return Err(StreamwireError::MalformedFrame(format!(
                    "Invalid end flag 0x{:02x}",
                    other
                )))
            }
        };

        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[5..21]);

        Ok(Self {
            frame_type,
            payload_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            id: Uuid::from_bytes(id),
            end,
        })
    }

    /// Validate the declared length against the maximum frame size.
    pub fn validate(&self, max_frame_size: u32) -> Result<()> {
        if self.payload_length > max_frame_size {
            return Err(StreamwireError::MalformedFrame(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_frame_size
            )));
        }
        Ok(())
    }
}
