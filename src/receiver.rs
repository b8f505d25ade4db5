//! Receive loop: the single reader of a connection.
//!
//! Reads bytes, decodes frames, and routes each one:
//!
//! - `Stream` frames are fed to the stream table under their own id.
//! - `Response` frames are fed under the exchange id; when the control part
//!   completes it is decoded, its declared streams attached, and the pending
//!   exchange fulfilled.
//! - `Request` frames are fed under the exchange id; when the control part
//!   completes the request is handed to a handler task, so the loop never
//!   waits on application code.
//!
//! Completed `Stream` ids that no control message claimed are discarded.
//! Errors local to one id are logged and the loop continues. Malformed
//! frames, I/O errors and end of input tear the connection down.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::assembler::{BodyStream, FeedOutcome, StreamTable};
use crate::codec::JsonCodec;
use crate::connection::Shared;
use crate::error::{Result, StreamwireError};
use crate::message::{
    ReceivedRequest, ReceivedResponse, RequestHeader, ResponseHeader, StreamDescription,
    StreamingResponse,
};
use crate::protocol::{Frame, FrameBuffer, FrameType};

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Run until the peer closes, the transport fails, a malformed frame arrives,
/// or the connection is closed locally. Always ends with a teardown.
pub(crate) async fn receive_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameBuffer::with_max_frame_size(shared.max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut shutdown = shared.subscribe();

    let cause = 'read: loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("Peer closed the connection");
                    break 'read None;
                }
                Ok(n) => n,
                Err(e) => break 'read Some(StreamwireError::Io(e)),
            },
            _ = shutdown.wait_for(|closed| *closed) => break 'read None,
        };

        let frames = match decoder.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => break 'read Some(e),
        };

        for frame in frames {
            if let Err(e) = dispatch_frame(&shared, frame) {
                if e.is_connection_fatal() {
                    break 'read Some(e);
                }
                tracing::debug!("Dropped frame: {}", e);
            }
        }
    };

    if decoder.has_partial_frame() {
        tracing::debug!("Discarding {} bytes of a partial frame", decoder.len());
    }
    shared.teardown(cause.as_ref());
}

/// Route one decoded frame.
fn dispatch_frame(shared: &Arc<Shared>, frame: Frame) -> Result<()> {
    let frame_type = frame.frame_type();
    let id = frame.id();
    let end = frame.is_end();

    tracing::trace!(
        "Frame {:?} id={} len={} end={}",
        frame_type,
        id,
        frame.payload_len(),
        end
    );

    if shared.streams.feed_as(frame_type, id, frame.payload, end)? == FeedOutcome::Pending {
        return Ok(());
    }

    match frame_type {
        FrameType::Stream => {
            // A body's control message always arrives first; a completed
            // stream that nothing consumed has no owner.
            if shared.streams.abandon(id) {
                tracing::debug!("Discarded stream {} with no owning message", id);
            }
            Ok(())
        }
        FrameType::Response => complete_response(shared, id),
        FrameType::Request => complete_request(shared, id),
    }
}

fn complete_response(shared: &Arc<Shared>, id: Uuid) -> Result<()> {
    let header: ResponseHeader = decode_control(&shared.streams.take_completed(id)?)?;

    if !shared.pending.contains(&id) {
        tracing::debug!(
            "{}; discarding {} attached streams",
            StreamwireError::UnknownExchange(id),
            header.streams.len()
        );
        for desc in &header.streams {
            shared.streams.abandon(desc.id);
        }
        return Ok(());
    }

    let streams = attach_streams(&shared.streams, &header.streams);
    shared.pending.fulfill(id, ReceivedResponse::new(header, streams));
    Ok(())
}

fn complete_request(shared: &Arc<Shared>, id: Uuid) -> Result<()> {
    let header: RequestHeader = decode_control(&shared.streams.take_completed(id)?)?;
    tracing::debug!("Request {} {} (exchange {})", header.verb, header.path, id);

    let streams = attach_streams(&shared.streams, &header.streams);
    let request = ReceivedRequest::new(id, header, streams);

    let Some(handler) = shared.handler.clone() else {
        tracing::debug!("No request handler; answering {} with 501", id);
        spawn_respond(shared.clone(), id, StreamingResponse::new(501));
        return Ok(());
    };

    let permit = match shared.handler_permits.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!("Handler capacity reached, answering {} with 503", id);
            spawn_respond(shared.clone(), id, StreamingResponse::new(503));
            return Ok(());
        }
    };

    let shared = shared.clone();
    tokio::spawn(async move {
        // Permit is held until the response is queued.
        let _permit = permit;

        // Run the handler as its own task so a panic still yields a response.
        let response = match tokio::spawn(handler.call(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!("Handler error for exchange {}: {}", id, e);
                StreamingResponse::internal_server_error()
            }
            Err(e) => {
                tracing::error!("Handler for exchange {} panicked: {}", id, e);
                StreamingResponse::internal_server_error()
            }
        };
        respond(&shared, id, response).await;
    });

    Ok(())
}

fn spawn_respond(shared: Arc<Shared>, id: Uuid, response: StreamingResponse) {
    tokio::spawn(async move { respond(&shared, id, response).await });
}

async fn respond(shared: &Shared, id: Uuid, response: StreamingResponse) {
    let frames = match response.disassemble(id, shared.max_frame_size as usize) {
        Ok(frames) => frames,
        Err(e) => {
            tracing::error!("Failed to encode response for exchange {}: {}", id, e);
            return;
        }
    };
    if let Err(e) = shared.writer.send(frames).await {
        tracing::debug!("Response for exchange {} not sent: {}", id, e);
    }
}

/// Declare each stream's length and take its consumer.
///
/// A stream that cannot be attached (duplicate or expired id, length already
/// overrun) is skipped with a warning; the rest of the message is delivered.
fn attach_streams(streams: &StreamTable, descriptions: &[StreamDescription]) -> Vec<BodyStream> {
    descriptions
        .iter()
        .filter_map(|desc| {
            let attached = streams
                .expect_length(desc.id, desc.length)
                .and_then(|()| streams.consume(desc.id));
            match attached {
                Ok(stream) => Some(stream.describe(desc)),
                Err(e) => {
                    tracing::warn!("Skipping stream {}: {}", desc.id, e);
                    None
                }
            }
        })
        .collect()
}

/// Control payloads that do not decode mean the peer is not speaking the protocol.
fn decode_control<T: DeserializeOwned>(payload: &Bytes) -> Result<T> {
    JsonCodec::decode(payload)
        .map_err(|e| StreamwireError::MalformedFrame(format!("invalid control header: {}", e)))
}
