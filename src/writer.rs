//! Dedicated writer task owning the write half of a connection.
//!
//! Senders hand whole logical messages (every frame of a disassembled
//! request or response) to the task over an mpsc channel. The task writes
//! each message contiguously, so only one frame sequence is ever mid-write
//! and two messages never interleave inside a single write.
//!
//! ```text
//! send()      ─┐
//! handler 1   ─┼─► mpsc::Sender<OutboundMessage> ─► Writer Task ─► transport
//! handler N   ─┘
//! ```
//!
//! Messages that are already queued are drained into one batch and written
//! with scatter/gather I/O. When the shutdown signal fires, the queue is
//! closed, whatever was already queued is flushed, and the transport is shut
//! down.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, StreamwireError};
use crate::protocol::{Frame, HEADER_SIZE};

/// Default channel capacity, in messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames gathered into a single write operation.
const MAX_BATCH_FRAMES: usize = 64;

/// A frame ready to be written, with its header pre-encoded.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes; empty for a bare end marker.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

impl From<Frame> for OutboundFrame {
    fn from(frame: Frame) -> Self {
        Self {
            header: frame.header.encode(),
            payload: frame.payload,
        }
    }
}

/// Every frame of one logical message, in send order.
pub type OutboundMessage = Vec<OutboundFrame>;

/// Handle for queueing messages on the writer task.
///
/// Cheap to clone; shared by the connection and every handler task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundMessage>,
}

impl WriterHandle {
    /// Queue a whole message.
    ///
    /// Waits while the channel is full. Fails with `ConnectionLost` once the
    /// writer task has stopped.
    pub async fn send<I>(&self, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = Frame>,
    {
        let message: OutboundMessage = frames.into_iter().map(OutboundFrame::from).collect();
        if message.is_empty() {
            return Ok(());
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| StreamwireError::ConnectionLost)
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task.
///
/// The task ends cleanly when every [`WriterHandle`] is dropped or `shutdown`
/// turns `true`, and with an error when the transport fails.
pub fn spawn_writer_task<W>(
    writer: W,
    channel_capacity: usize,
    shutdown: watch::Receiver<bool>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer, shutdown));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut watching = true;

    loop {
        let first = tokio::select! {
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            signalled = shutdown.wait_for(|closed| *closed), if watching => {
                // Refuse new messages; recv() still yields what is queued.
                if signalled.is_ok() {
                    rx.close();
                }
                watching = false;
                continue;
            }
        };
        let mut batch = first;

        // Only whole messages join the batch.
        while batch.len() < MAX_BATCH_FRAMES {
            match rx.try_recv() {
                Ok(message) => batch.extend(message),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::warn!("Writer task stopping: {}", e);
            return Err(e);
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames with `write_vectored`, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(StreamwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything after the first `skip_bytes` of the batch.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}
