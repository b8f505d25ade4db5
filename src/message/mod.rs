//! Logical messages exchanged above the frame layer.
//!
//! Outbound messages ([`StreamingRequest`], [`StreamingResponse`]) own their
//! bodies as [`ContentStream`]s. Inbound messages ([`ReceivedRequest`],
//! [`ReceivedResponse`]) expose bodies as lazily reassembled
//! [`BodyStream`](crate::BodyStream)s.
//!
//! The control part of every message travels as a small JSON document:
//!
//! ```json
//! {"verb":"POST","path":"/api/messages","headers":{"x-id":"1"},
//!  "streams":[{"id":"6f1c…","type":"application/json","length":17}]}
//! ```

mod content;
mod request;
mod response;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use content::ContentStream;
pub use request::{ReceivedRequest, StreamingRequest};
pub use response::{ReceivedResponse, StreamingResponse};

pub(crate) use request::RequestHeader;
pub(crate) use response::ResponseHeader;

/// Header mapping carried by requests and responses.
pub type Headers = BTreeMap<String, String>;

/// Describes one attached stream inside a control header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    /// Stream id; frames of type `Stream` carry it.
    pub id: Uuid,
    /// Content type of the stream, if declared.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Total byte length of the stream.
    pub length: u64,
}

/// Describe outbound streams and pair them with their bytes for disassembly.
pub(crate) fn split_streams(
    streams: &[ContentStream],
) -> (Vec<StreamDescription>, Vec<(Uuid, bytes::Bytes)>) {
    streams
        .iter()
        .map(|s| (s.description(), (s.id(), s.body().clone())))
        .unzip()
}
