//! Codec module - typed helpers for control headers and bodies.
//!
//! The core treats bodies as opaque bytes. These codecs are conveniences for
//! callers that want structured bodies:
//!
//! - [`JsonCodec`] - JSON via `serde_json`, also used for control headers
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! # Example
//!
//! ```
//! use streamwire::codec::{JsonCodec, MsgPackCodec};
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let encoded = MsgPackCodec::encode(&42u32).unwrap();
//! let decoded: u32 = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, 42);
//! ```

mod json;
mod msgpack;

pub use json::{JsonCodec, JSON_CONTENT_TYPE};
pub use msgpack::{MsgPackCodec, MSGPACK_CONTENT_TYPE};
