// src/core/protocol.rs

//! The wire envelope pushed to clients.
//!
//! Every outbound message is a `{"type": ..., "data": {...}}` JSON object sent as a
//! single text frame. The set of message kinds is closed; each kind carries a fixed
//! payload struct so a malformed payload is unrepresentable.

use crate::core::errors::NotifierError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The greeting text carried by every `CONNECTED` envelope.
pub const CONNECTED_MESSAGE: &str = "WebSocket connection established";

/// A notification envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    /// Sent once, right after a session is registered.
    Connected(ConnectedPayload),
    /// Application-level keepalive, visible to browser clients.
    Heartbeat(HeartbeatPayload),
    /// An upcoming class for the student's level.
    ClassReminder(ClassReminderPayload),
    /// A student filed a new late-slip request. Sent to admins.
    NewLateSlipRequest(LateSlip),
    /// An admin approved or rejected a request. Sent to the owning student.
    LateSlipStatusChanged(LateSlipStatusUpdate),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub message: String,
    pub time: String,
    pub user_id: String,
}

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPayload {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClassReminderPayload {
    pub module_code: String,
    pub module_name: String,
    pub start_time: String,
    pub room: String,
    pub message: String,
    pub level: String,
}

/// A late-slip request as announced to admins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LateSlip {
    pub id: String,
    pub student_id: String,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A decision on a late-slip request, addressed to the student who filed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LateSlipStatusUpdate {
    pub id: String,
    pub student_id: String,
    pub status: String,
    /// Human-readable text. Filled from `status` when left empty.
    #[serde(default)]
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl Envelope {
    /// Builds the `CONNECTED` greeting for `identity` stamped with `now`.
    pub fn connected(identity: &str, now: DateTime<Utc>) -> Self {
        Envelope::Connected(ConnectedPayload {
            message: CONNECTED_MESSAGE.to_string(),
            time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            user_id: identity.to_string(),
        })
    }

    pub fn heartbeat() -> Self {
        Envelope::Heartbeat(HeartbeatPayload::default())
    }

    /// The wire tag of this envelope, also used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Connected(_) => "CONNECTED",
            Envelope::Heartbeat(_) => "HEARTBEAT",
            Envelope::ClassReminder(_) => "CLASS_REMINDER",
            Envelope::NewLateSlipRequest(_) => "NEW_LATE_SLIP_REQUEST",
            Envelope::LateSlipStatusChanged(_) => "LATE_SLIP_STATUS_CHANGED",
        }
    }

    /// Serializes the envelope into the text of a single frame.
    ///
    /// The result is shared by reference count so one serialization can be
    /// enqueued to any number of connections.
    pub fn to_text(&self) -> Result<Arc<str>, NotifierError> {
        let json = serde_json::to_string(self)?;
        Ok(Arc::from(json))
    }
}

impl LateSlipStatusUpdate {
    /// Returns the message to show the student, falling back to a sentence
    /// derived from the new status.
    pub fn display_message(&self) -> String {
        if self.message.trim().is_empty() {
            format!("Your late slip request has been {}", self.status.to_lowercase())
        } else {
            self.message.clone()
        }
    }
}
