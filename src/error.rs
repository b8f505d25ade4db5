//! Error types for streamwire.

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::FrameType;

/// Main error type for all streamwire operations.
#[derive(Debug, Error)]
pub enum StreamwireError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Header or length inconsistency on the wire. Fatal to the connection.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Stream bytes fed for an id that already completed or was abandoned.
    #[error("Unknown or expired stream id: {0}")]
    UnknownOrExpiredId(Uuid),

    /// A frame's type differs from the type of the frames that opened its id.
    #[error("Frame type {received:?} does not match {opened:?} for id {id}")]
    FrameTypeMismatch {
        /// Frame id.
        id: Uuid,
        /// Type of the first frame seen for the id.
        opened: FrameType,
        /// Type of the offending frame.
        received: FrameType,
    },

    /// Too many ids are buffered with no owner; frames for new ids are dropped.
    #[error("Unclaimed stream limit {limit} reached, dropping id {id}")]
    UnclaimedLimit {
        /// Id of the dropped frame.
        id: Uuid,
        /// Configured limit.
        limit: usize,
    },

    /// Response for an exchange that is not (or no longer) pending.
    #[error("Unknown exchange: {0}")]
    UnknownExchange(Uuid),

    /// An exchange with this id is already registered.
    #[error("Duplicate exchange id: {0}")]
    DuplicateId(Uuid),

    /// A stream delivered more bytes than its control header declared.
    #[error("Stream {id} exceeded declared length {declared} (received {received})")]
    LengthExceeded {
        /// Stream id.
        id: Uuid,
        /// Length declared by the owning request/response.
        declared: u64,
        /// Bytes received so far, including the offending frame.
        received: u64,
    },

    /// The exchange deadline elapsed before a response arrived.
    #[error("Exchange timed out")]
    Timeout,

    /// The exchange was cancelled by the caller.
    #[error("Exchange cancelled")]
    Cancelled,

    /// The stream was abandoned before it completed.
    #[error("Stream aborted")]
    Aborted,

    /// Connection closed or failed; every outstanding exchange sees this.
    #[error("Connection lost")]
    ConnectionLost,

    /// A request handler failed; the peer receives a 500 response.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Invalid builder configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StreamwireError {
    /// Whether this error tears down the whole connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            StreamwireError::MalformedFrame(_)
                | StreamwireError::Io(_)
                | StreamwireError::ConnectionLost
        )
    }
}

/// Result type alias using StreamwireError.
pub type Result<T> = std::result::Result<T, StreamwireError>;
