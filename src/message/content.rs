//! Outbound body streams.

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use super::StreamDescription;
use crate::codec::{JsonCodec, MsgPackCodec, JSON_CONTENT_TYPE, MSGPACK_CONTENT_TYPE};
use crate::error::Result;

/// A body attached to an outbound request or response.
///
/// Each content stream gets a fresh id and is framed independently of the
/// control message that declares it.
#[derive(Debug, Clone)]
pub struct ContentStream {
    id: Uuid,
    content_type: Option<String>,
    body: Bytes,
}

impl ContentStream {
    /// Wrap raw bytes.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_type: None,
            body: body.into(),
        }
    }

    /// UTF-8 text body.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text.into()).with_content_type("text/plain; charset=utf-8")
    }

    /// Serialize a value as a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(JsonCodec::encode(value)?).with_content_type(JSON_CONTENT_TYPE))
    }

    /// Serialize a value as a MessagePack body.
    pub fn msgpack<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(MsgPackCodec::encode(value)?).with_content_type(MSGPACK_CONTENT_TYPE))
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Stream id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Content type, if set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body length.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub(crate) fn description(&self) -> StreamDescription {
        StreamDescription {
            id: self.id,
            content_type: self.content_type.clone(),
            length: self.body.len() as u64,
        }
    }
}
