//! # streamwire
//!
//! Multiplexed, bidirectional request/response streaming over a single
//! duplex byte connection (socket, pipe, or anything `AsyncRead + AsyncWrite`).
//!
//! Each logical exchange is an HTTP-like request or response whose control
//! part (verb, path, status, headers, stream declarations) travels as JSON and
//! whose bodies travel as independent byte streams. Everything is cut into
//! small frames tagged with a 128-bit id, so any number of exchanges share the
//! connection and a large body never blocks a small one.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): 22-byte header + payload, incremental decoding
//! - **Disassembler** ([`protocol::Disassembler`]): message → size-bounded frames
//! - **Stream table** ([`assembler`]): frames → per-id [`BodyStream`]s
//! - **Pending registry** ([`pending`]): request id → waiting caller
//! - **Connection** ([`Connection`]): receive loop, writer task, both roles
//!
//! ## Example
//!
//! ```
//! use streamwire::{Connection, ContentStream, ReceivedRequest, StreamingRequest, StreamingResponse};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> streamwire::Result<()> {
//! let (a, b) = tokio::io::duplex(64 * 1024);
//!
//! let _server = Connection::builder()
//!     .handler(|mut req: ReceivedRequest| async move {
//!         let body = req.read_body().await?;
//!         Ok(StreamingResponse::ok().body(body))
//!     })
//!     .build(b)?;
//! let client = Connection::new(a)?;
//!
//! let request = StreamingRequest::post("/echo").stream(ContentStream::text("hello"));
//! let mut response = client.send(request, None).await?;
//!
//! assert_eq!(response.status_code(), 200);
//! assert_eq!(response.read_body().await?.as_ref(), b"hello");
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod codec;
pub mod error;
pub mod handler;
pub mod message;
pub mod pending;
pub mod protocol;
pub mod transport;

mod connection;
mod receiver;
mod writer;

pub use assembler::{BodyStream, StreamTable};
pub use connection::{Connection, ConnectionBuilder, DEFAULT_MAX_CONCURRENT_HANDLERS};
pub use error::{Result, StreamwireError};
pub use handler::{RequestHandler, Router};
pub use message::{
    ContentStream, Headers, ReceivedRequest, ReceivedResponse, StreamDescription,
    StreamingRequest, StreamingResponse,
};
pub use pending::{ExchangeCanceller, PendingExchange, PendingRegistry};
