//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use streamwire::protocol::{Frame, FrameType};
//! use bytes::Bytes;
//! use uuid::Uuid;
//!
//! let id = Uuid::new_v4();
//! let frame = Frame::new(FrameType::Request, id, Bytes::from_static(b"hello"), true);
//!
//! let bytes = frame.encode();
//! let decoded = Frame::decode(&bytes, 4096).unwrap();
//! assert_eq!(decoded.id(), id);
//! assert_eq!(decoded.payload(), b"hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use super::wire_format::{FrameHeader, FrameType, HEADER_SIZE};
use crate::error::{Result, StreamwireError};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame, deriving the header length from the payload.
    pub fn new(frame_type: FrameType, id: Uuid, payload: Bytes, end: bool) -> Self {
        let header = FrameHeader::new(frame_type, id, payload.len() as u32, end);
        Self { header, payload }
    }

    /// Assemble a frame from an already decoded header.
    pub(crate) fn from_header(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    /// Get the correlation id.
    #[inline]
    pub fn id(&self) -> Uuid {
        self.header.id
    }

    /// Check if this is the last fragment for its id.
    #[inline]
    pub fn is_end(&self) -> bool {
        self.header.end
    }

    /// Encoded size on the wire (header + payload).
    #[inline]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode the frame into a contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode exactly one frame from `buf`.
    ///
    /// The buffer must hold the header followed by exactly `payload_length`
    /// bytes. Use [`FrameBuffer`](super::FrameBuffer) for byte streams.
    pub fn decode(buf: &[u8], max_frame_size: u32) -> Result<Self> {
        let header = FrameHeader::decode(buf)?;
        header.validate(max_frame_size)?;

        let available = buf.len() - HEADER_SIZE;
        if available != header.payload_length as usize {
            return Err(StreamwireError::MalformedFrame(format!(
                "Declared payload length {} but {} bytes available",
                header.payload_length, available
            )));
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

    #[test]
    fn test_frame_creation() {
        let id = Uuid::new_v4();
        let frame = Frame::new(FrameType::Response, id, Bytes::from_static(b"hello"), false);

        assert_eq!(frame.frame_type(), FrameType::Response);
        assert_eq!(frame.id(), id);
        assert_eq!(frame.payload(), b"hello");
        assert_eq!(frame.header.payload_length, 5);
        assert!(!frame.is_end());
    }

    #[test]
    fn test_encode_decode_exact_inverse() {
        let frame = Frame::new(FrameType::Stream, Uuid::new_v4(), Bytes::from_static(b"abc"), true);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        assert_eq!(Frame::decode(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap(), frame);
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::new(FrameType::Stream, Uuid::nil(), Bytes::new(), true);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let decoded = Frame::decode(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(decoded.payload_len(), 0);
        assert!(decoded.is_end());
    }

    #[test]
    fn test_decode_truncated_payload() {
        let frame = Frame::new(FrameType::Request, Uuid::nil(), Bytes::from_static(b"hello"), true);
        let bytes = frame.encode();

        let err = Frame::decode(&bytes[..bytes.len() - 1], DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, StreamwireError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let frame = Frame::new(FrameType::Request, Uuid::nil(), Bytes::from_static(b"hi"), true);
        let mut bytes = frame.encode().to_vec();
        bytes.push(0);

        assert!(Frame::decode(&bytes, DEFAULT_MAX_FRAME_SIZE).is_err());
    }

    #[test]
    fn test_decode_oversized() {
        let frame = Frame::new(FrameType::Stream, Uuid::nil(), Bytes::from(vec![1u8; 10]), true);
        let err = Frame::decode(&frame.encode(), 8).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_payload_zero_copy() {
        let original = Bytes::from_static(b"test data");
        let frame = Frame::new(FrameType::Stream, Uuid::nil(), original.clone(), false);
        assert_eq!(frame.payload.as_ptr(), original.as_ptr());
    }
}
