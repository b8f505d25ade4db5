//! Responses: outbound builder and inbound reassembled form.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{split_streams, ContentStream, Headers, StreamDescription};
use crate::assembler::BodyStream;
use crate::codec::JsonCodec;
use crate::error::Result;
use crate::protocol::{Disassembler, FrameType};

/// Control part of a response on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResponseHeader {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(default)]
    pub streams: Vec<StreamDescription>,
}

/// A response to send back for a received request.
#[derive(Debug, Clone)]
pub struct StreamingResponse {
    status_code: u16,
    headers: Headers,
    streams: Vec<ContentStream>,
}

impl StreamingResponse {
    /// Response with the given status code and no body.
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Headers::new(),
            streams: Vec::new(),
        }
    }

    /// Response with a status code and an optional body.
    pub fn create(status_code: u16, body: Option<ContentStream>) -> Self {
        let response = Self::new(status_code);
        match body {
            Some(stream) => response.stream(stream),
            None => response,
        }
    }

    /// `200 OK`.
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// `400 Bad Request`.
    pub fn bad_request() -> Self {
        Self::new(400)
    }

    /// `404 Not Found`.
    pub fn not_found() -> Self {
        Self::new(404)
    }

    /// `403 Forbidden`.
    pub fn forbidden() -> Self {
        Self::new(403)
    }

    /// `500 Internal Server Error`.
    pub fn internal_server_error() -> Self {
        Self::new(500)
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

    /// Status code.
    pub fn status_code(&self) -> u16 {
        self.status_code
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
        let header = ResponseHeader {
            status_code: self.status_code,
            headers: self.headers.clone(),
            streams: descriptions,
        };
        let control = Bytes::from(JsonCodec::encode(&header)?);
        Ok(Disassembler::new(
            FrameType::Response,
            id,
            control,
            bodies,
            max_frame_size,
        ))
    }
}

/// A response received from the peer for an outbound request.
#[derive(Debug)]
pub struct ReceivedResponse {
    status_code: u16,
    headers: Headers,
    streams: Vec<BodyStream>,
}

impl ReceivedResponse {
    pub(crate) fn new(header: ResponseHeader, streams: Vec<BodyStream>) -> Self {
        Self {
            status_code: header.status_code,
            headers: header.headers,
            streams,
        }
    }

    /// Status code.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
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

    #[test]
    fn test_status_constructors() {
        assert_eq!(StreamingResponse::ok().status_code(), 200);
        assert_eq!(StreamingResponse::bad_request().status_code(), 400);
        assert_eq!(StreamingResponse::not_found().status_code(), 404);
        assert_eq!(StreamingResponse::forbidden().status_code(), 403);
        assert_eq!(StreamingResponse::internal_server_error().status_code(), 500);
    }

    #[test]
    fn test_create_with_body() {
        let response = StreamingResponse::create(201, Some(ContentStream::text("made")));
        assert_eq!(response.status_code(), 201);
        assert_eq!(response.streams().len(), 1);

        let response = StreamingResponse::create(204, None);
        assert!(response.streams().is_empty());
    }

    #[test]
    fn test_header_wire_format() {
        let header = ResponseHeader {
            status_code: 200,
            headers: Headers::new(),
            streams: Vec::new(),
        };
        let json = String::from_utf8(JsonCodec::encode(&header).unwrap()).unwrap();
        assert_eq!(json, r#"{"statusCode":200,"streams":[]}"#);
    }

    #[test]
    fn test_disassemble_uses_response_frames() {
        let id = Uuid::new_v4();
        let frames: Vec<_> = StreamingResponse::ok()
            .disassemble(id, 8)
            .unwrap()
            .collect();

        assert!(frames.len() > 1);
        assert!(frames
            .iter()
            .all(|f| f.frame_type() == FrameType::Response && f.id() == id));
        assert!(frames.last().unwrap().is_end());
    }
}
