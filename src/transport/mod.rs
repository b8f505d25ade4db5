//! Transport helpers for local peers.
//!
//! The connection works over any `AsyncRead + AsyncWrite` byte channel
//! (TCP, in-memory duplex, ...). This module provides the local variants:
//! - Unix Domain Sockets (Linux/macOS)
//! - Named Pipes (Windows)

mod pipe;

pub use pipe::{connect, generate_pipe_path, PipeListener, PipeStream};
