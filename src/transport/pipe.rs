//! Platform-specific local socket transport.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! # Example
//!
//! ```no_run
//! use streamwire::transport::{connect, generate_pipe_path, PipeListener};
//! use streamwire::Connection;
//!
//! # async fn run() -> streamwire::Result<()> {
//! let path = generate_pipe_path();
//! let listener = PipeListener::bind(&path).await?;
//!
//! let client = Connection::new(connect(&path).await?)?;
//! let server = Connection::new(listener.accept().await?)?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use uuid::Uuid;

/// Generate a unique local socket path for this process.
///
/// Format:
/// - Unix: `{tmp}/streamwire-{pid}-{uuid}.sock`
/// - Windows: `\\.\pipe\streamwire-{pid}-{uuid}`
pub fn generate_pipe_path() -> String {
    let pid = std::process::id();
    let suffix = Uuid::new_v4().simple();

    #[cfg(unix)]
    {
        std::env::temp_dir()
            .join(format!("streamwire-{}-{}.sock", pid, suffix))
            .to_string_lossy()
            .into_owned()
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\streamwire-{}-{}", pid, suffix)
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    /// Connected local socket.
    pub type PipeStream = UnixStream;

    /// Unix Domain Socket listener. Removes its socket file on drop.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    impl PipeListener {
        /// Bind to a Unix socket path.
        ///
        /// Removes any existing socket file at the path before binding.
        pub async fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;
            tracing::debug!("Listening on {}", path);

            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept one connection.
        pub async fn accept(&self) -> Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(stream)
        }

        /// Socket path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Connect to a listening socket.
    pub async fn connect(path: &str) -> Result<PipeStream> {
        Ok(UnixStream::connect(path).await?)
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };
    use tokio::sync::Mutex;

    /// Either end of a connected named pipe.
    pub enum PipeStream {
        /// Accepted by a [`PipeListener`].
        Server(NamedPipeServer),
        /// Opened by [`connect`].
        Client(NamedPipeClient),
    }

    /// Windows Named Pipe listener.
    ///
    /// Always holds one instance ready for the next client.
    pub struct PipeListener {
        next: Mutex<NamedPipeServer>,
        path: String,
    }

    impl PipeListener {
        /// Create the first pipe instance.
        pub async fn bind(path: &str) -> Result<Self> {
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)?;
            tracing::debug!("Listening on {}", path);

            Ok(Self {
                next: Mutex::new(first),
                path: path.to_string(),
            })
        }

        /// Accept one connection.
        pub async fn accept(&self) -> Result<PipeStream> {
            let mut next = self.next.lock().await;
            next.connect().await?;

            let fresh = ServerOptions::new().create(&self.path)?;
            let connected = std::mem::replace(&mut *next, fresh);
            Ok(PipeStream::Server(connected))
        }

        /// Pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    /// Connect to a listening pipe.
    pub async fn connect(path: &str) -> Result<PipeStream> {
        Ok(PipeStream::Client(ClientOptions::new().open(path)?))
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => Pin::new(pipe).poll_read(cx, buf),
                PipeStream::Client(pipe) => Pin::new(pipe).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => Pin::new(pipe).poll_write(cx, buf),
                PipeStream::Client(pipe) => Pin::new(pipe).poll_write(cx, buf),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => Pin::new(pipe).poll_flush(cx),
                PipeStream::Client(pipe) => Pin::new(pipe).poll_flush(cx),
            }
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => Pin::new(pipe).poll_shutdown(cx),
                PipeStream::Client(pipe) => Pin::new(pipe).poll_shutdown(cx),
            }
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{connect, PipeListener, PipeStream};

#[cfg(windows)]
pub use windows_impl::{connect, PipeListener, PipeStream};
