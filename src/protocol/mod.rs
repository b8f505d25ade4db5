//! Protocol module - wire format, framing, and disassembly.
//!
//! This module implements the binary frame layer:
//! - 22-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Disassembler that slices logical messages into frames

mod disassembler;
mod frame;
mod frame_buffer;
mod wire_format;

pub use disassembler::Disassembler;
pub use frame::Frame;
pub use frame_buffer::FrameBuffer;
pub use wire_format::{FrameHeader, FrameType, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
