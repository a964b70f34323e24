// src/core/dispatcher.rs

//! Targeted and broadcast delivery on top of the `Registry`.
//!
//! Every entry point returns as soon as the message is enqueued. A stalled client
//! loses messages once its queue fills; it never slows down the caller or any other
//! client.

use crate::connection::{Connection, EnqueueError};
use crate::core::errors::NotifierError;
use crate::core::metrics::{self, drop_reason};
use crate::core::protocol::{Envelope, LateSlip, LateSlipStatusUpdate};
use crate::core::registry::{Registry, Role};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// The outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections in the snapshot the broadcast ran over.
    pub recipients: usize,
    /// Connections whose queue accepted the message.
    pub delivered: usize,
}

impl BroadcastReport {
    pub fn missed(&self) -> usize {
        self.recipients - self.delivered
    }
}

/// An envelope serialized once, ready to be enqueued any number of times.
#[derive(Debug, Clone)]
pub struct PreparedEnvelope {
    kind: &'static str,
    text: Arc<str>,
}

impl PreparedEnvelope {
    /// Serializes `envelope`. Returns `None` (and logs) if serialization fails.
    pub fn new(envelope: &Envelope) -> Option<Self> {
        serialize(envelope).map(|text| Self {
            kind: envelope.kind(),
            text,
        })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Enqueues `envelope` to the current session of `identity`.
    ///
    /// Returns `false` if the student is not connected or their queue is full.
    pub fn send_to_student(&self, identity: &str, envelope: &Envelope) -> bool {
        match PreparedEnvelope::new(envelope) {
            Some(prepared) => self.send_prepared(identity, &prepared),
            None => false,
        }
    }

    /// Like [`Dispatcher::send_to_student`], for an envelope serialized up front so it
    /// can be sent to many students individually.
    pub fn send_prepared(&self, identity: &str, prepared: &PreparedEnvelope) -> bool {
        match self.registry.lookup(identity) {
            Some(conn) => enqueue(&conn, prepared.kind, prepared.text.clone()),
            None => {
                metrics::MESSAGES_DROPPED_TOTAL
                    .with_label_values(&[drop_reason::NOT_CONNECTED])
                    .inc();
                debug!(identity, kind = prepared.kind, "Recipient not connected.");
                false
            }
        }
    }

    /// Enqueues `envelope` to every connection of `role` present when the call starts.
    pub fn broadcast_to_role(&self, role: Role, envelope: &Envelope) -> BroadcastReport {
        let Some(text) = serialize(envelope) else {
            return BroadcastReport::default();
        };
        fan_out(&self.registry.snapshot(role), envelope.kind(), text)
    }

    /// Enqueues `envelope` to every connection of either role.
    pub fn broadcast_all(&self, envelope: &Envelope) -> BroadcastReport {
        let Some(text) = serialize(envelope) else {
            return BroadcastReport::default();
        };
        fan_out(&self.registry.snapshot_all(), envelope.kind(), text)
    }

    /// Announces a newly filed late-slip request to all admins.
    pub fn notify_new_late_slip(&self, slip: &LateSlip) -> BroadcastReport {
        let report = self.broadcast_to_role(
            Role::Admin,
            &Envelope::NewLateSlipRequest(slip.clone()),
        );
        debug!(
            late_slip_id = %slip.id,
            recipients = report.recipients,
            delivered = report.delivered,
            "Announced new late slip to admins."
        );
        report
    }

    /// Tells the student who filed a request that its status changed.
    pub fn notify_late_slip_status(&self, update: &LateSlipStatusUpdate) -> bool {
        let mut update = update.clone();
        update.message = update.display_message();
        let student_id = update.student_id.clone();
        self.send_to_student(&student_id, &Envelope::LateSlipStatusChanged(update))
    }
}

fn serialize(envelope: &Envelope) -> Option<Arc<str>> {
    envelope
        .to_text()
        .map_err(|e: NotifierError| {
            warn!(kind = envelope.kind(), "Failed to serialize envelope: {}", e);
        })
        .ok()
}

fn fan_out(conns: &[Arc<Connection>], kind: &'static str, text: Arc<str>) -> BroadcastReport {
    let delivered = conns
        .iter()
        .filter(|conn| enqueue(conn, kind, text.clone()))
        .count();
    BroadcastReport {
        recipients: conns.len(),
        delivered,
    }
}

fn enqueue(conn: &Connection, kind: &'static str, text: Arc<str>) -> bool {
    match conn.try_send(text) {
        Ok(()) => {
            metrics::MESSAGES_ENQUEUED_TOTAL
                .with_label_values(&[kind])
                .inc();
            true
        }
        Err(EnqueueError::QueueFull) => {
            metrics::MESSAGES_DROPPED_TOTAL
                .with_label_values(&[drop_reason::QUEUE_FULL])
                .inc();
            debug!(
                connection_id = conn.id(),
                identity = %conn.identity(),
                kind,
                "Outbound queue full, message dropped."
            );
            false
        }
        Err(EnqueueError::Closed) => {
            metrics::MESSAGES_DROPPED_TOTAL
                .with_label_values(&[drop_reason::CLOSED])
                .inc();
            false
        }
    }
}

/// Enqueues an envelope directly to one connection, bypassing the registry.
/// Used for the greeting sent during the handshake.
pub(crate) fn send_envelope(conn: &Connection, envelope: &Envelope) -> bool {
    match serialize(envelope) {
        Some(text) => enqueue(conn, envelope.kind(), text),
        None => false,
    }
}
