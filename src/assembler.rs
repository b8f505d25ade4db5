//! Stream table: per-id reassembly of inbound frames.
//!
//! Every frame payload is pushed into an unbounded per-id queue, so feeding
//! never suspends the receive loop. A consumer obtains the queue once through
//! [`StreamTable::consume`] and reads it as a [`BodyStream`], possibly before
//! the last frame has arrived.
//!
//! ```text
//!  feed(id, bytes, end) ──► Entry { tx ─► queue ─► rx } ──► BodyStream::next_chunk()
//!                                 │
//!                        end: drop tx (consumer sees completion)
//!                    abandon: send Aborted, drop tx
//! ```
//!
//! Ids that completed or were abandoned are remembered for the lifetime of
//! the table, so late frames are reported as `UnknownOrExpiredId`.
//!
//! Every entry keeps the frame type that opened it; a frame of another type
//! for the same id abandons the entry. Entries opened by frames that nothing
//! has claimed yet (no declared length, no consumer) are capped, so a peer
//! cannot make the table grow without bound.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::{JsonCodec, MsgPackCodec};
use crate::error::{Result, StreamwireError};
use crate::message::StreamDescription;
use crate::protocol::FrameType;

/// Default cap on entries opened by frames that no consumer has claimed.
pub const DEFAULT_MAX_UNCLAIMED: usize = 1024;

type Chunk = Result<Bytes>;

/// Result of feeding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// More frames are expected for this id.
    Pending,
    /// This frame completed the id.
    Complete,
}

/// Reassembly state for one id.
struct Entry {
    /// Type of the frames that own this id.
    kind: FrameType,
    /// Producer side; `None` once the id completed.
    tx: Option<mpsc::UnboundedSender<Chunk>>,
    /// Consumer side; `None` once handed out.
    rx: Option<mpsc::UnboundedReceiver<Chunk>>,
    received: u64,
    expected: Option<u64>,
}

impl Entry {
    fn new(kind: FrameType) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            kind,
            tx: Some(tx),
            rx: Some(rx),
            received: 0,
            expected: None,
        }
    }

    /// Nobody has declared a length for this id or taken its consumer.
    fn is_unclaimed(&self) -> bool {
        self.expected.is_none() && self.rx.is_some()
    }
}

struct Inner {
    entries: HashMap<Uuid, Entry>,
    retired: HashSet<Uuid>,
    closed: bool,
    max_unclaimed: usize,
}

/// Per-connection table of streams being reassembled.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct StreamTable {
    inner: Arc<Mutex<Inner>>,
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::with_max_unclaimed(DEFAULT_MAX_UNCLAIMED)
    }
}

impl StreamTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table holding at most `max_unclaimed` unclaimed entries.
    pub fn with_max_unclaimed(max_unclaimed: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                retired: HashSet::new(),
                closed: false,
                max_unclaimed,
            })),
        }
    }

    /// Append a `Stream` frame payload to the entry for `id`.
    ///
    /// Shorthand for [`feed_as`](Self::feed_as) with [`FrameType::Stream`].
    pub fn feed(&self, id: Uuid, bytes: Bytes, end: bool) -> Result<FeedOutcome> {
        self.feed_as(FrameType::Stream, id, bytes, end)
    }

    /// Append a frame payload to the entry for `id`, creating it if absent.
    ///
    /// # Errors
    ///
    /// - `UnknownOrExpiredId` if `id` already completed or was abandoned
    /// - `FrameTypeMismatch` if `kind` differs from the type that opened `id`
    ///   (the entry is abandoned)
    /// - `UnclaimedLimit` if `id` is new and the unclaimed cap is reached
    /// - `LengthExceeded` if the declared length is overrun (the entry is abandoned)
    /// - `ConnectionLost` after [`abandon_all`](Self::abandon_all)
    pub fn feed_as(
        &self,
        kind: FrameType,
        id: Uuid,
        bytes: Bytes,
        end: bool,
    ) -> Result<FeedOutcome> {
        let mut guard = self.inner.lock();
        let Inner {
            entries,
            retired,
            closed,
            max_unclaimed,
        } = &mut *guard;

        if *closed {
            return Err(StreamwireError::ConnectionLost);
        }
        if retired.contains(&id) {
            return Err(StreamwireError::UnknownOrExpiredId(id));
        }

        if !entries.contains_key(&id) {
            let unclaimed = entries.values().filter(|e| e.is_unclaimed()).count();
            if unclaimed >= *max_unclaimed {
                return Err(StreamwireError::UnclaimedLimit {
                    id,
                    limit: *max_unclaimed,
                });
            }
        }

        let entry = entries.entry(id).or_insert_with(|| Entry::new(kind));
        if entry.kind != kind {
            let opened = entry.kind;
            if let Some(tx) = entry.tx.as_ref() {
                let _ = tx.send(Err(StreamwireError::Aborted));
            }
            entries.remove(&id);
            retired.insert(id);
            return Err(StreamwireError::FrameTypeMismatch {
                id,
                opened,
                received: kind,
            });
        }
        let Some(tx) = entry.tx.as_ref() else {
            return Err(StreamwireError::UnknownOrExpiredId(id));
        };

        let received = entry.received + bytes.len() as u64;
        if let Some(declared) = entry.expected {
            if received > declared {
                let _ = tx.send(Err(StreamwireError::Aborted));
                entries.remove(&id);
                retired.insert(id);
                return Err(StreamwireError::LengthExceeded {
                    id,
                    declared,
                    received,
                });
            }
        }
        entry.received = received;

        // A dropped consumer just discards the bytes.
        if !bytes.is_empty() {
            let _ = tx.send(Ok(bytes));
        }

        if !end {
            return Ok(FeedOutcome::Pending);
        }

        if let Some(declared) = entry.expected {
            if received < declared {
                tracing::debug!(
                    "Stream {} completed with {} of {} declared bytes",
                    id,
                    received,
                    declared
                );
            }
        }

        entry.tx = None;
        if entry.rx.is_none() {
            entries.remove(&id);
            retired.insert(id);
        }
        Ok(FeedOutcome::Complete)
    }

    /// Record the length declared for `id` by its owning control message.
    pub fn expect_length(&self, id: Uuid, length: u64) -> Result<()> {
        let mut guard = self.inner.lock();
        let Inner {
            entries,
            retired,
            closed,
            ..
        } = &mut *guard;

        if *closed {
            return Err(StreamwireError::ConnectionLost);
        }
        if retired.contains(&id) {
            return Err(StreamwireError::UnknownOrExpiredId(id));
        }

        let entry = entries.entry(id).or_insert_with(|| Entry::new(FrameType::Stream));
        if entry.received > length {
            let received = entry.received;
            if let Some(tx) = entry.tx.as_ref() {
                let _ = tx.send(Err(StreamwireError::Aborted));
            }
            entries.remove(&id);
            retired.insert(id);
            return Err(StreamwireError::LengthExceeded {
                id,
                declared: length,
                received,
            });
        }
        entry.expected = Some(length);
        Ok(())
    }

    /// Take the consumer for `id`. Allowed once per id, before or after completion.
    pub fn consume(&self, id: Uuid) -> Result<BodyStream> {
        let mut guard = self.inner.lock();
        let Inner {
            entries,
            retired,
            closed,
            ..
        } = &mut *guard;

        if *closed {
            return Err(StreamwireError::ConnectionLost);
        }
        if retired.contains(&id) {
            return Err(StreamwireError::UnknownOrExpiredId(id));
        }

        let entry = entries.entry(id).or_insert_with(|| Entry::new(FrameType::Stream));
        let rx = entry
            .rx
            .take()
            .ok_or(StreamwireError::UnknownOrExpiredId(id))?;
        let declared = entry.expected;

        if entry.tx.is_none() {
            entries.remove(&id);
            retired.insert(id);
        }

        let mut stream = BodyStream::new(id, rx);
        stream.length = declared;
        Ok(stream)
    }

    /// Collect every byte of a completed, not yet consumed entry.
    ///
    /// Used for control payloads, which are small and needed whole.
    pub fn take_completed(&self, id: Uuid) -> Result<Bytes> {
        let mut guard = self.inner.lock();
        let Inner {
            entries, retired, ..
        } = &mut *guard;

        let complete = entries
            .get(&id)
            .is_some_and(|e| e.tx.is_none() && e.rx.is_some());
        if !complete {
            return Err(StreamwireError::UnknownOrExpiredId(id));
        }

        let mut rx = entries
            .remove(&id)
            .and_then(|e| e.rx)
            .ok_or(StreamwireError::UnknownOrExpiredId(id))?;
        retired.insert(id);
        drop(guard);

        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk?);
        }
        Ok(concat(chunks))
    }

    /// Discard state for `id`, releasing its consumer with `Aborted`.
    ///
    /// Returns `true` if an entry existed.
    pub fn abandon(&self, id: Uuid) -> bool {
        let mut guard = self.inner.lock();
        let Inner {
            entries, retired, ..
        } = &mut *guard;

        retired.insert(id);
        match entries.remove(&id) {
            Some(entry) => {
                if let Some(tx) = entry.tx {
                    let _ = tx.send(Err(StreamwireError::Aborted));
                }
                true
            }
            None => false,
        }
    }

    /// Release every open consumer with `ConnectionLost` and refuse further use.
    pub fn abandon_all(&self) -> usize {
        let mut guard = self.inner.lock();
        guard.closed = true;
        let drained: Vec<(Uuid, Entry)> = guard.entries.drain().collect();
        drop(guard);

        let count = drained.len();
        for (_, entry) in drained {
            if let Some(tx) = entry.tx {
                let _ = tx.send(Err(StreamwireError::ConnectionLost));
            }
        }
        count
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` has a live entry.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.lock().entries.contains_key(id)
    }
}

fn concat(mut chunks: Vec<Bytes>) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.swap_remove(0),
        _ => {
            let total = chunks.iter().map(Bytes::len).sum();
            let mut buf = BytesMut::with_capacity(total);
            for chunk in chunks {
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        }
    }
}

/// Lazily reassembled body of an inbound request or response.
///
/// Chunks become available as frames arrive. `next_chunk` returns `None`
/// once the stream completed, or an error if it was abandoned.
#[derive(Debug)]
pub struct BodyStream {
    id: Uuid,
    content_type: Option<String>,
    length: Option<u64>,
    rx: mpsc::UnboundedReceiver<Chunk>,
}

impl BodyStream {
    fn new(id: Uuid, rx: mpsc::UnboundedReceiver<Chunk>) -> Self {
        Self {
            id,
            content_type: None,
            length: None,
            rx,
        }
    }

    pub(crate) fn describe(mut self, description: &StreamDescription) -> Self {
        self.content_type = description.content_type.clone();
        self.length = Some(description.length);
        self
    }

    /// Stream id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Content type declared by the sender, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Length declared by the sender, if known.
    pub fn declared_length(&self) -> Option<u64> {
        self.length
    }

    /// Wait for the next chunk.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.rx.recv().await
    }

    /// Read the remaining body into one buffer.
    pub async fn read_to_end(mut self) -> Result<Bytes> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            chunks.push(chunk?);
        }
        Ok(concat(chunks))
    }

    /// Read the body as UTF-8 text.
    pub async fn read_string(self) -> Result<String> {
        let bytes = self.read_to_end().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            StreamwireError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Read and decode a JSON body.
    pub async fn read_json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.read_to_end().await?;
        JsonCodec::decode(&bytes)
    }

    /// Read and decode a MessagePack body.
    pub async fn read_msgpack<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.read_to_end().await?;
        MsgPackCodec::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_feed_then_consume() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        assert_eq!(
            table.feed(id, Bytes::from_static(b"hel"), false).unwrap(),
            FeedOutcome::Pending
        );
        assert_eq!(
            table.feed(id, Bytes::from_static(b"lo"), true).unwrap(),
            FeedOutcome::Complete
        );

        let body = table.consume(id).unwrap();
        assert_eq!(body.read_to_end().await.unwrap(), Bytes::from_static(b"hello"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_consume_before_completion_streams() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        let mut body = table.consume(id).unwrap();
        table.feed(id, Bytes::from_static(b"first"), false).unwrap();

        let chunk = body.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk, Bytes::from_static(b"first"));

        let feeder = table.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeder.feed(id, Bytes::from_static(b"second"), true).unwrap();
        });

        let chunk = body.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk, Bytes::from_static(b"second"));
        assert!(body.next_chunk().await.is_none());
        assert!(!table.contains(&id));
    }

    #[test]
    fn test_feed_after_completion_is_expired() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        table.feed(id, Bytes::from_static(b"x"), true).unwrap();
        let err = table.feed(id, Bytes::from_static(b"y"), true).unwrap_err();
        assert!(matches!(err, StreamwireError::UnknownOrExpiredId(e) if e == id));

        let _ = table.consume(id).unwrap();
        let err = table.feed(id, Bytes::from_static(b"y"), false).unwrap_err();
        assert!(matches!(err, StreamwireError::UnknownOrExpiredId(_)));
    }

    #[test]
    fn test_consume_only_once() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        let _body = table.consume(id).unwrap();
        assert!(matches!(
            table.consume(id),
            Err(StreamwireError::UnknownOrExpiredId(_))
        ));
    }

    #[tokio::test]
    async fn test_abandon_releases_consumer() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        let mut body = table.consume(id).unwrap();
        table.feed(id, Bytes::from_static(b"partial"), false).unwrap();
        assert!(table.abandon(id));

        assert!(body.next_chunk().await.unwrap().is_ok());
        assert!(matches!(
            body.next_chunk().await,
            Some(Err(StreamwireError::Aborted))
        ));
        assert!(body.next_chunk().await.is_none());

        assert!(matches!(
            table.feed(id, Bytes::new(), true),
            Err(StreamwireError::UnknownOrExpiredId(_))
        ));
    }

    #[tokio::test]
    async fn test_abandon_wakes_blocked_reader() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();
        let body = table.consume(id).unwrap();

        let reader = tokio::spawn(body.read_to_end());
        tokio::time::sleep(Duration::from_millis(10)).await;
        table.abandon(id);

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(StreamwireError::Aborted)));
    }

    #[tokio::test]
    async fn test_declared_length_enforced() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        table.expect_length(id, 4).unwrap();
        let body = table.consume(id).unwrap();
        assert_eq!(body.declared_length(), Some(4));

        table.feed(id, Bytes::from_static(b"abc"), false).unwrap();
        let err = table.feed(id, Bytes::from_static(b"de"), true).unwrap_err();
        assert!(matches!(
            err,
            StreamwireError::LengthExceeded {
                declared: 4,
                received: 5,
                ..
            }
        ));
        assert!(matches!(
            body.read_to_end().await,
            Err(StreamwireError::Aborted)
        ));
    }

    #[test]
    fn test_expect_length_after_overrun() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        table.feed(id, Bytes::from_static(b"toolong"), false).unwrap();
        assert!(matches!(
            table.expect_length(id, 3),
            Err(StreamwireError::LengthExceeded { .. })
        ));
        assert!(!table.contains(&id));
    }

    #[test]
    fn test_take_completed() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        table.feed(id, Bytes::from_static(b"{\"a\""), false).unwrap();
        assert!(table.take_completed(id).is_err());

        table.feed(id, Bytes::from_static(b":1}"), true).unwrap();
        assert_eq!(
            table.take_completed(id).unwrap(),
            Bytes::from_static(b"{\"a\":1}")
        );
        assert!(table.take_completed(id).is_err());
    }

    #[tokio::test]
    async fn test_abandon_all_signals_connection_lost() {
        let table = StreamTable::new();
        let a = table.consume(Uuid::new_v4()).unwrap();
        let b = table.consume(Uuid::new_v4()).unwrap();

        assert_eq!(table.abandon_all(), 2);

        assert!(matches!(
            a.read_to_end().await,
            Err(StreamwireError::ConnectionLost)
        ));
        assert!(matches!(
            b.read_to_end().await,
            Err(StreamwireError::ConnectionLost)
        ));
        assert!(matches!(
            table.feed(Uuid::new_v4(), Bytes::new(), true),
            Err(StreamwireError::ConnectionLost)
        ));
    }

    #[test]
    fn test_interleaved_ids_are_isolated() {
        let table = StreamTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        table.feed(a, Bytes::from_static(b"A1"), false).unwrap();
        table.feed(b, Bytes::from_static(b"B1"), false).unwrap();
        assert_eq!(
            table.feed(a, Bytes::from_static(b"A2"), true).unwrap(),
            FeedOutcome::Complete
        );
        assert_eq!(
            table.feed(b, Bytes::from_static(b"B2"), true).unwrap(),
            FeedOutcome::Complete
        );

        assert_eq!(table.take_completed(a).unwrap(), Bytes::from_static(b"A1A2"));
        assert_eq!(table.take_completed(b).unwrap(), Bytes::from_static(b"B1B2"));
    }

    #[tokio::test]
    async fn test_frame_type_mismatch_abandons_entry() {
        let table = StreamTable::new();
        let id = Uuid::new_v4();

        table
            .feed_as(FrameType::Request, id, Bytes::from_static(b"{\"verb\""), false)
            .unwrap();
        let err = table
            .feed_as(FrameType::Stream, id, Bytes::from_static(b"}"), true)
            .unwrap_err();
        assert!(matches!(
            err,
            StreamwireError::FrameTypeMismatch {
                opened: FrameType::Request,
                received: FrameType::Stream,
                ..
            }
        ));
        assert!(table.is_empty());
        assert!(table.take_completed(id).is_err());

        // A consumer already holding the id is released.
        let body_id = Uuid::new_v4();
        let body = table.consume(body_id).unwrap();
        assert!(table
            .feed_as(FrameType::Response, body_id, Bytes::new(), true)
            .is_err());
        assert!(matches!(
            body.read_to_end().await,
            Err(StreamwireError::Aborted)
        ));
    }

    #[test]
    fn test_unclaimed_entries_are_capped() {
        let table = StreamTable::with_max_unclaimed(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        table.feed(a, Bytes::from_static(b"a"), false).unwrap();
        table.feed(b, Bytes::from_static(b"b"), true).unwrap();
        assert!(matches!(
            table.feed(c, Bytes::from_static(b"c"), false),
            Err(StreamwireError::UnclaimedLimit { limit: 2, .. })
        ));
        assert!(!table.contains(&c));

        // Existing ids keep flowing at the cap.
        assert_eq!(
            table.feed(a, Bytes::from_static(b"a"), true).unwrap(),
            FeedOutcome::Complete
        );

        // Claimed entries do not count.
        table.expect_length(a, 2).unwrap();
        table.feed(c, Bytes::from_static(b"c"), false).unwrap();
        let _claimed = table.consume(Uuid::new_v4()).unwrap();
        assert_eq!(table.len(), 4);
    }
}
