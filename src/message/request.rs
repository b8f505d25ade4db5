//! Requests: outbound builder and inbound reassembled form.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{split_streams, ContentStream, Headers, StreamDescription};
use crate::assembler::BodyStream;
use crate::codec::JsonCodec;
use crate::error::Result;
use crate::protocol::{Disassembler, FrameType};

/// Control part of a request on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RequestHeader {
    pub verb: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(default)]
    pub streams: Vec<StreamDescription>,
}

/// A request to send to the peer.
///
/// # Example
///
/// ```
/// use streamwire::{ContentStream, StreamingRequest};
///
/// let request = StreamingRequest::post("/api/messages")
///     .header("x-conversation", "abc")
///     .stream(ContentStream::text("hello"));
///
/// assert_eq!(request.verb(), "POST");
/// assert_eq!(request.streams().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct StreamingRequest {
    verb: String,
    path: String,
    headers: Headers,
    streams: Vec<ContentStream>,
}

impl StreamingRequest {
    /// Create a request with an arbitrary verb.
    pub fn new(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            path: path.into(),
            headers: Headers::new(),
            streams: Vec::new(),
        }
    }

    /// `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// `POST` request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// `PUT` request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new("PUT", path)
    }

    /// `DELETE` request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("DELETE", path)
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach a body stream.
    pub fn stream(mut self, stream: ContentStream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Attach raw bytes as a body stream.
    pub fn body(self, body: impl Into<Bytes>) -> Self {
        self.stream(ContentStream::new(body))
    }

    /// Attach a JSON body stream.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self> {
        Ok(self.stream(ContentStream::json(value)?))
    }

    /// Verb.
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Attached streams.
    pub fn streams(&self) -> &[ContentStream] {
        &self.streams
    }

    /// Serialize the control header and split everything into frames under `id`.
    pub fn disassemble(&self, id: Uuid, max_frame_size: usize) -> Result<Disassembler> {
        let (descriptions, bodies) = split_streams(&self.streams);
        let header = RequestHeader {
            verb: self.verb.clone(),
            path: self.path.clone(),
            headers: self.headers.clone(),
            streams: descriptions,
        };
        let control = Bytes::from(JsonCodec::encode(&header)?);
        Ok(Disassembler::new(
            FrameType::Request,
            id,
            control,
            bodies,
            max_frame_size,
        ))
    }
}

/// A request received from the peer, handed to the request handler.
#[derive(Debug)]
pub struct ReceivedRequest {
    id: Uuid,
    verb: String,
    path: String,
    headers: Headers,
    streams: Vec<BodyStream>,
}

impl ReceivedRequest {
    pub(crate) fn new(id: Uuid, header: RequestHeader, streams: Vec<BodyStream>) -> Self {
        Self {
            id,
            verb: header.verb,
            path: header.path,
            headers: header.headers,
            streams,
        }
    }

    /// Exchange id; the response is sent under the same id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Verb.
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Look up one header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Attached streams, in declaration order.
    pub fn streams(&self) -> &[BodyStream] {
        &self.streams
    }

    /// Take ownership of the attached streams.
    pub fn take_streams(&mut self) -> Vec<BodyStream> {
        std::mem::take(&mut self.streams)
    }

    /// Read the first attached stream fully; empty if there is none.
    pub async fn read_body(&mut self) -> Result<Bytes> {
        if self.streams.is_empty() {
            return Ok(Bytes::new());
        }
        self.streams.remove(0).read_to_end().await
    }

    /// Read the first attached stream as JSON.
    pub async fn read_body_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.read_body().await?;
        JsonCodec::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;

    #[test]
    fn test_verbs() {
        assert_eq!(StreamingRequest::get("/a").verb(), "GET");
        assert_eq!(StreamingRequest::post("/a").verb(), "POST");
        assert_eq!(StreamingRequest::put("/a").verb(), "PUT");
        assert_eq!(StreamingRequest::delete("/a").verb(), "DELETE");
    }

    #[test]
    fn test_disassemble_declares_streams() {
        let body = ContentStream::text("hello");
        let body_id = body.id();
        let request = StreamingRequest::post("/api/messages")
            .header("k", "v")
            .stream(body);

        let id = Uuid::new_v4();
        let frames: Vec<Frame> = request.disassemble(id, 4096).unwrap().collect();
        assert_eq!(frames.len(), 2);

        assert_eq!(frames[0].frame_type(), FrameType::Request);
        assert_eq!(frames[0].id(), id);
        let header: RequestHeader = JsonCodec::decode(frames[0].payload()).unwrap();
        assert_eq!(header.verb, "POST");
        assert_eq!(header.path, "/api/messages");
        assert_eq!(header.headers.get("k").map(String::as_str), Some("v"));
        assert_eq!(header.streams.len(), 1);
        assert_eq!(header.streams[0].id, body_id);
        assert_eq!(header.streams[0].length, 5);

        assert_eq!(frames[1].frame_type(), FrameType::Stream);
        assert_eq!(frames[1].id(), body_id);
        assert_eq!(frames[1].payload(), b"hello");
    }

    #[test]
    fn test_header_defaults_when_absent() {
        let header: RequestHeader = JsonCodec::decode(br#"{"verb":"GET","path":"/"}"#).unwrap();
        assert!(header.headers.is_empty());
        assert!(header.streams.is_empty());
    }
}
