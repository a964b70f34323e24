// src/connection/session.rs

//! Defines `Connection`, the shared handle to one live client session.

use crate::connection::transport::CloseReason;
use crate::core::registry::Role;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A process-unique, monotonically increasing session identifier.
pub type ConnectionId = u64;

/// The receiving end of a connection's outbound queue, owned by its write duty.
pub type OutboundReceiver = mpsc::Receiver<Arc<str>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why a message could not be placed on a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is at capacity. The new message was dropped; queued ones are untouched.
    QueueFull,
    /// The connection has been closed.
    Closed,
}

/// One live session bound to one identity.
///
/// The handle is shared between the registry, the dispatcher and the session's own
/// duties. Sending never blocks and closing is idempotent.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: String,
    role: Role,
    connected_at: DateTime<Utc>,
    /// `None` once closed. Dropping the sender closes the queue.
    queue: Mutex<Option<mpsc::Sender<Arc<str>>>>,
    close_reason: Mutex<Option<CloseReason>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Connection {
    /// Creates a connection with an outbound queue holding at most `capacity` messages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. Configuration validation rejects that value.
    pub fn new(
        identity: impl Into<String>,
        role: Role,
        capacity: usize,
    ) -> (Arc<Connection>, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity: identity.into(),
            role,
            connected_at: Utc::now(),
            queue: Mutex::new(Some(tx)),
            close_reason: Mutex::new(None),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        };
        (Arc::new(conn), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Enqueues a serialized message without waiting.
    pub fn try_send(&self, text: Arc<str>) -> Result<(), EnqueueError> {
        let queue = self.queue.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Enqueues a serialized message, reporting whether it was accepted.
    pub fn send(&self, text: Arc<str>) -> bool {
        self.try_send(text).is_ok()
    }

    /// Closes the session with a normal close frame. See [`Connection::close_with`].
    pub fn close(&self) -> bool {
        self.close_with(CloseReason::normal())
    }

    /// Closes the outbound queue and signals both duties to stop.
    ///
    /// Only the first call has any effect and returns `true`. The recorded `reason` is
    /// what the write duty sends as the final frame.
    pub fn close_with(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.close_reason.lock() = Some(reason);
        // Queued messages are discarded along with the sender.
        self.queue.lock().take();
        self.cancel.cancel();
        debug!(
            connection_id = self.id,
            identity = %self.identity,
            role = %self.role,
            "Connection closed."
        );
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The number of messages currently waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        match self.queue.lock().as_ref() {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            None => 0,
        }
    }

    /// The close frame to send, if the connection has been closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    /// A token that is cancelled when the connection closes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}
