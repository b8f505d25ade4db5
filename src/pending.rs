//! Pending-exchange registry: correlates outbound requests with responses.
//!
//! Each registered id owns a oneshot slot that is resolved exactly once, by
//! [`PendingRegistry::fulfill`], [`PendingRegistry::fail`],
//! [`PendingRegistry::fail_all`], a deadline, or cancellation. Resolution
//! removes the entry, so a second response for the same id is an
//! `UnknownExchange` rather than a protocol violation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Result, StreamwireError};
use crate::message::ReceivedResponse;

type Slot = oneshot::Sender<Result<ReceivedResponse>>;

#[derive(Default)]
struct Inner {
    pending: HashMap<Uuid, Slot>,
    closed: bool,
}

/// Per-connection registry of exchanges awaiting a response.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl PendingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the handle the caller awaits.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if `id` is already pending, `ConnectionLost` once the
    /// registry has been failed wholesale.
    pub fn register(&self, id: Uuid, deadline: Option<Instant>) -> Result<PendingExchange> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StreamwireError::ConnectionLost);
        }
        if inner.pending.contains_key(&id) {
            return Err(StreamwireError::DuplicateId(id));
        }

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);

        Ok(PendingExchange {
            id,
            deadline,
            rx: Some(rx),
            registry: self.clone(),
        })
    }

    /// Complete `id` with a response.
    ///
    /// Returns `false` (and logs) when no such exchange is pending; a late or
    /// duplicate response is expected and never an error for the caller.
    pub fn fulfill(&self, id: Uuid, response: ReceivedResponse) -> bool {
        let slot = self.inner.lock().pending.remove(&id);
        match slot {
            Some(tx) => {
                if tx.send(Ok(response)).is_err() {
                    tracing::debug!("Waiter for exchange {} went away before fulfillment", id);
                }
                true
            }
            None => {
                tracing::debug!("{}", StreamwireError::UnknownExchange(id));
                false
            }
        }
    }

    /// Complete `id` with an error. Returns `false` if it was not pending.
    pub fn fail(&self, id: Uuid, error: StreamwireError) -> bool {
        let slot = self.inner.lock().pending.remove(&id);
        match slot {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Resolve every pending exchange with `ConnectionLost` and refuse new ones.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(Uuid, Slot)> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.pending.drain().collect()
        };

        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(StreamwireError::ConnectionLost));
        }
        count
    }

    /// Cancel `id`, unblocking its waiter with `Cancelled`.
    pub fn cancel(&self, id: Uuid) -> bool {
        self.fail(id, StreamwireError::Cancelled)
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.lock().pending.contains_key(id)
    }

    /// Number of pending exchanges.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: &Uuid) {
        self.inner.lock().pending.remove(id);
    }
}

/// Handle for one outbound exchange.
///
/// Dropping the handle before it resolves removes the registry entry.
pub struct PendingExchange {
    id: Uuid,
    deadline: Option<Instant>,
    rx: Option<oneshot::Receiver<Result<ReceivedResponse>>>,
    registry: PendingRegistry,
}

impl PendingExchange {
    /// Exchange id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A cloneable handle that cancels this exchange from elsewhere.
    pub fn canceller(&self) -> ExchangeCanceller {
        ExchangeCanceller {
            id: self.id,
            registry: self.registry.clone(),
        }
    }

    /// Wait for the response, the deadline, or cancellation.
    ///
    /// On timeout the entry is removed (by `Drop`), so a response arriving
    /// later is reported as an unknown exchange.
    pub async fn wait(mut self) -> Result<ReceivedResponse> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(StreamwireError::Cancelled);
        };

        let outcome = match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!("Exchange {} timed out", self.id);
                    return Err(StreamwireError::Timeout);
                }
            },
            None => rx.await,
        };
        self.rx = None;

        // A dropped sender means the entry vanished without resolution.
        outcome.unwrap_or(Err(StreamwireError::ConnectionLost))
    }
}

impl Drop for PendingExchange {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.registry.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for PendingExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingExchange")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Cancels one exchange; cheap to clone and safe to use after resolution.
#[derive(Clone)]
pub struct ExchangeCanceller {
    id: Uuid,
    registry: PendingRegistry,
}

impl ExchangeCanceller {
    /// Remove the entry and wake the waiter with `Cancelled`.
    ///
    /// Returns `false` if the exchange had already resolved.
    pub fn cancel(&self) -> bool {
        self.registry.cancel(self.id)
    }
}
