// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use super::session::Connection;
use crate::core::registry::Registry;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

/// An RAII guard to ensure a session is always closed and unregistered when its
/// handler's scope is exited, however the handler ends.
pub struct ConnectionGuard {
    registry: Arc<Registry>,
    conn: Arc<Connection>,
    /// Held for the life of the session so the slot is freed exactly on teardown.
    permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionGuard {
    pub(crate) fn new(registry: Arc<Registry>, conn: Arc<Connection>) -> Self {
        Self {
            registry,
            conn,
            permit: None,
        }
    }

    /// Ties a `max_clients` slot to this session.
    pub(crate) fn hold_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.permit = Some(permit);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.conn.close();
        if !self.registry.unregister(&self.conn) {
            debug!(
                connection_id = self.conn.id(),
                identity = %self.conn.identity(),
                "Connection was no longer registered upon cleanup (likely replaced)."
            );
        }
        if self.permit.take().is_some() {
            debug!(connection_id = self.conn.id(), "Released client slot.");
        }
    }
}
