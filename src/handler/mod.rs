//! Inbound request handling.
//!
//! Provides:
//! - [`RequestHandler`] - the capability a connection invokes for each
//!   completed inbound request
//! - [`Router`] - dispatches by verb and path
//!
//! Any `Fn(ReceivedRequest) -> impl Future<Output = Result<StreamingResponse>>`
//! closure is a handler.
//!
//! # Example
//!
//! ```
//! use streamwire::handler::Router;
//! use streamwire::{ReceivedRequest, StreamingResponse};
//!
//! let router = Router::new()
//!     .get("/health", |_req: ReceivedRequest| async { Ok(StreamingResponse::ok()) })
//!     .post("/echo", |mut req: ReceivedRequest| async move {
//!         let body = req.read_body().await?;
//!         Ok(StreamingResponse::ok().body(body))
//!     });
//! ```

mod router;

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::message::{ReceivedRequest, StreamingResponse};

pub use router::Router;

/// Result type for handler functions.
pub type HandlerResult = Result<StreamingResponse>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for request handlers.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request; the returned response is sent under its id.
    fn call(&self, request: ReceivedRequest) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(ReceivedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: ReceivedRequest) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(request))
    }
}
