//! Connection builder and protocol adapter.
//!
//! The [`ConnectionBuilder`] configures limits and the request handler. The
//! [`Connection`] manages the lifecycle of one duplex byte channel:
//! 1. Split the transport into read and write halves
//! 2. Spawn the writer task (owns the write half)
//! 3. Spawn the receive loop (owns the read half)
//! 4. Send requests and await responses; answer inbound requests
//! 5. Tear down exactly once, failing everything still in flight
//!
//! Both roles run on every connection: either peer may send requests and
//! either peer may answer them.
//!
//! # Example
//!
//! ```no_run
//! use streamwire::{Connection, ContentStream, ReceivedRequest, StreamingRequest, StreamingResponse};
//!
//! # async fn run(io: tokio::io::DuplexStream) -> streamwire::Result<()> {
//! let connection = Connection::builder()
//!     .max_frame_size(8192)
//!     .handler(|mut req: ReceivedRequest| async move {
//!         let body = req.read_body().await?;
//!         Ok(StreamingResponse::ok().body(body))
//!     })
//!     .build(io)?;
//!
//! let request = StreamingRequest::post("/api/echo").stream(ContentStream::text("hi"));
//! let mut response = connection.send(request, None).await?;
//! assert_eq!(response.read_body().await?.as_ref(), b"hi");
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use uuid::Uuid;

use crate::assembler::{StreamTable, DEFAULT_MAX_UNCLAIMED};
use crate::error::{Result, StreamwireError};
use crate::handler::RequestHandler;
use crate::message::{ReceivedResponse, StreamingRequest};
use crate::pending::{PendingExchange, PendingRegistry};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::receiver::receive_loop;
use crate::writer::{spawn_writer_task, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// Default maximum concurrent inbound request handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Builder for configuring and creating a [`Connection`].
pub struct ConnectionBuilder {
    max_frame_size: u32,
    request_timeout: Option<Duration>,
    max_concurrent_handlers: usize,
    channel_capacity: usize,
    max_unclaimed_streams: usize,
    handler: Option<Arc<dyn RequestHandler>>,
}

impl ConnectionBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            request_timeout: None,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_unclaimed_streams: DEFAULT_MAX_UNCLAIMED,
            handler: None,
        }
    }

    /// Maximum payload bytes per frame, for both directions.
    ///
    /// Default: 4096
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Deadline applied to `send` calls that do not pass their own.
    ///
    /// Default: none
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Maximum number of inbound requests handled at once.
    ///
    /// Requests beyond the limit are answered with `503`.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    /// Capacity of the writer queue, in messages.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Maximum inbound ids buffered before any message claims them.
    ///
    /// Frames opening a new id beyond the limit are dropped.
    /// Default: 1024
    pub fn max_unclaimed_streams(mut self, limit: usize) -> Self {
        self.max_unclaimed_streams = limit;
        self
    }

    /// Handler for inbound requests. Without one, requests get `501`.
    pub fn handler(mut self, handler: impl RequestHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(StreamwireError::InvalidConfig(
                "max_frame_size must be at least 1".into(),
            ));
        }
        if self.max_concurrent_handlers == 0 {
            return Err(StreamwireError::InvalidConfig(
                "max_concurrent_handlers must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(StreamwireError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.max_unclaimed_streams == 0 {
            return Err(StreamwireError::InvalidConfig(
                "max_unclaimed_streams must be at least 1".into(),
            ));
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(StreamwireError::InvalidConfig(
                "request_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Start the connection over an established duplex byte channel.
    ///
    /// Must be called within a tokio runtime.
    pub fn build<T>(self, io: T) -> Result<Connection>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.validate()?;

        let (read_half, write_half) = tokio::io::split(io);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (writer, writer_task) =
            spawn_writer_task(write_half, self.channel_capacity, shutdown_rx);

        let shared = Arc::new(Shared {
            streams: StreamTable::with_max_unclaimed(self.max_unclaimed_streams),
            pending: PendingRegistry::new(),
            writer,
            handler: self.handler,
            handler_permits: Arc::new(Semaphore::new(self.max_concurrent_handlers)),
            max_frame_size: self.max_frame_size,
            torn_down: AtomicBool::new(false),
            shutdown: shutdown_tx,
        });

        // A failed write is as fatal as a failed read.
        let watcher = shared.clone();
        tokio::spawn(async move {
            match writer_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => watcher.teardown(Some(&e)),
                Err(e) => {
                    tracing::error!("Writer task failed: {}", e);
                    watcher.teardown(None);
                }
            }
        });

        tokio::spawn(receive_loop(read_half, shared.clone()));

        tracing::debug!(
            "Connection started (max_frame_size={}, handler={})",
            shared.max_frame_size,
            shared.handler.is_some()
        );

        Ok(Connection {
            shared,
            request_timeout: self.request_timeout,
        })
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by the connection handle, the receive loop and handler tasks.
pub(crate) struct Shared {
    pub(crate) streams: StreamTable,
    pub(crate) pending: PendingRegistry,
    pub(crate) writer: WriterHandle,
    pub(crate) handler: Option<Arc<dyn RequestHandler>>,
    pub(crate) handler_permits: Arc<Semaphore>,
    pub(crate) max_frame_size: u32,
    torn_down: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Fail every outstanding exchange and stream, then stop both tasks.
    ///
    /// Only the first call has any effect.
    pub(crate) fn teardown(&self, cause: Option<&StreamwireError>) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let exchanges = self.pending.fail_all();
        let streams = self.streams.abandon_all();
        self.shutdown.send_replace(true);

        match cause {
            Some(e) => tracing::warn!(
                "Connection lost: {} ({} exchanges, {} streams failed)",
                e,
                exchanges,
                streams
            ),
            None => tracing::debug!(
                "Connection closed ({} exchanges, {} streams failed)",
                exchanges,
                streams
            ),
        }
    }
}

/// A running multiplexed connection.
///
/// Dropping the connection closes it.
pub struct Connection {
    shared: Arc<Shared>,
    request_timeout: Option<Duration>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Start a connection with default settings and no request handler.
    pub fn new<T>(io: T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        ConnectionBuilder::new().build(io)
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` overrides the builder's request timeout. On timeout the
    /// exchange is dropped and `Timeout` returned; the connection and every
    /// other exchange stay usable.
    pub async fn send(
        &self,
        request: StreamingRequest,
        timeout: Option<Duration>,
    ) -> Result<ReceivedResponse> {
        self.begin(request, timeout).await?.wait().await
    }

    /// Send a request and return the pending exchange without waiting.
    ///
    /// The caller awaits [`PendingExchange::wait`] and may cancel it through
    /// [`PendingExchange::canceller`].
    pub async fn begin(
        &self,
        request: StreamingRequest,
        timeout: Option<Duration>,
    ) -> Result<PendingExchange> {
        if self.shared.is_closed() {
            return Err(StreamwireError::ConnectionLost);
        }

        let id = Uuid::new_v4();
        let frames = request.disassemble(id, self.shared.max_frame_size as usize)?;
        let deadline = timeout.or(self.request_timeout).map(|t| Instant::now() + t);

        // Registered before the first frame leaves, so a fast response always
        // finds its entry.
        let exchange = self.shared.pending.register(id, deadline)?;
        tracing::trace!(
            "Sending {} {} as exchange {} ({} frames)",
            request.verb(),
            request.path(),
            id,
            frames.len()
        );
        // The deadline also bounds queueing behind a stalled transport.
        // Dropping `exchange` on expiry removes its entry.
        let queued = self.shared.writer.send(frames);
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, queued)
                .await
                .map_err(|_| StreamwireError::Timeout)??,
            None => queued.await?,
        }

        Ok(exchange)
    }

    /// Close the connection.
    ///
    /// Outstanding exchanges fail with `ConnectionLost`; open inbound body
    /// streams are released with the same error.
    pub fn close(&self) {
        self.shared.teardown(None);
    }

    /// Whether the connection has been closed or lost.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Wait until the connection is closed or lost.
    pub async fn closed(&self) {
        let mut shutdown = self.shared.subscribe();
        let _ = shutdown.wait_for(|closed| *closed).await;
    }

    /// Number of exchanges awaiting a response.
    pub fn pending_exchanges(&self) -> usize {
        self.shared.pending.len()
    }

    /// Number of inbound streams being reassembled.
    pub fn open_streams(&self) -> usize {
        self.shared.streams.len()
    }

    /// Maximum payload bytes per frame.
    pub fn max_frame_size(&self) -> u32 {
        self.shared.max_frame_size
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.teardown(None);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("max_frame_size", &self.shared.max_frame_size)
            .field("pending_exchanges", &self.pending_exchanges())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = ConnectionBuilder::default();
        assert_eq!(builder.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(builder.request_timeout, None);
        assert_eq!(builder.max_concurrent_handlers, DEFAULT_MAX_CONCURRENT_HANDLERS);
        assert_eq!(builder.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(builder.max_unclaimed_streams, DEFAULT_MAX_UNCLAIMED);
        assert!(builder.handler.is_none());
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Connection::builder()
            .max_frame_size(512)
            .request_timeout(Duration::from_secs(3))
            .max_concurrent_handlers(8)
            .channel_capacity(16);

        assert_eq!(builder.max_frame_size, 512);
        assert_eq!(builder.request_timeout, Some(Duration::from_secs(3)));
        assert_eq!(builder.max_concurrent_handlers, 8);
        assert_eq!(builder.channel_capacity, 16);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (io, _peer) = tokio::io::duplex(64);
        let result = Connection::builder().max_frame_size(0).build(io);
        assert!(matches!(result, Err(StreamwireError::InvalidConfig(_))));

        let (io, _peer) = tokio::io::duplex(64);
        let result = Connection::builder().max_concurrent_handlers(0).build(io);
        assert!(matches!(result, Err(StreamwireError::InvalidConfig(_))));

        let (io, _peer) = tokio::io::duplex(64);
        let result = Connection::builder().max_unclaimed_streams(0).build(io);
        assert!(matches!(result, Err(StreamwireError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_send_after_close_is_connection_lost() {
        let (io, _peer) = tokio::io::duplex(1024);
        let connection = Connection::new(io).unwrap();

        connection.close();
        connection.closed().await;
        assert!(connection.is_closed());

        let result = connection.send(StreamingRequest::get("/"), None).await;
        assert!(matches!(result, Err(StreamwireError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_peer_eof_closes_connection() {
        let (io, peer) = tokio::io::duplex(1024);
        let connection = Connection::new(io).unwrap();

        drop(peer);
        tokio::time::timeout(Duration::from_secs(1), connection.closed())
            .await
            .unwrap();
        assert!(connection.is_closed());
    }

    /// Reads from a duplex pipe; panics on the first write.
    struct PanicOnWrite(tokio::io::DuplexStream);

    impl AsyncRead for PanicOnWrite {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for PanicOnWrite {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            panic!("transport write failed");
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_writer_panic_fails_pending_exchange() {
        let (io, _peer) = tokio::io::duplex(1024);
        let connection = Connection::new(PanicOnWrite(io)).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            connection.send(StreamingRequest::get("/"), None),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(StreamwireError::ConnectionLost)));
        assert!(connection.is_closed());
    }
}
