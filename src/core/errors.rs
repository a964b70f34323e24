// src/core/errors.rs

//! Defines the primary error type for the notification core.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing every failure the core can observe.
/// None of these are fatal to the process: transport errors end one connection,
/// store errors end one notifier tick.
#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),

    #[error("Schedule store error: {0}")]
    Store(String),

    #[error("Invalid schedule record: {0}")]
    InvalidRecord(String),
}

// Manual implementation of Clone because `std::io::Error` and `serde_json::Error`
// are not cloneable. Both are wrapped in an Arc.
impl Clone for NotifierError {
    fn clone(&self) -> Self {
        match self {
            NotifierError::Io(e) => NotifierError::Io(Arc::clone(e)),
            NotifierError::Transport(s) => NotifierError::Transport(s.clone()),
            NotifierError::WriteTimeout(d) => NotifierError::WriteTimeout(*d),
            NotifierError::ConnectionClosed => NotifierError::ConnectionClosed,
            NotifierError::Serialization(e) => NotifierError::Serialization(Arc::clone(e)),
            NotifierError::Store(s) => NotifierError::Store(s.clone()),
            NotifierError::InvalidRecord(s) => NotifierError::InvalidRecord(s.clone()),
        }
    }
}

impl PartialEq for NotifierError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NotifierError::Io(e1), NotifierError::Io(e2)) => e1.to_string() == e2.to_string(),
            (NotifierError::Transport(s1), NotifierError::Transport(s2)) => s1 == s2,
            (NotifierError::WriteTimeout(d1), NotifierError::WriteTimeout(d2)) => d1 == d2,
            (NotifierError::Serialization(e1), NotifierError::Serialization(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (NotifierError::Store(s1), NotifierError::Store(s2)) => s1 == s2,
            (NotifierError::InvalidRecord(s1), NotifierError::InvalidRecord(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for NotifierError {
    fn from(e: std::io::Error) -> Self {
        NotifierError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for NotifierError {
    fn from(e: serde_json::Error) -> Self {
        NotifierError::Serialization(Arc::new(e))
    }
}

impl From<axum::Error> for NotifierError {
    fn from(e: axum::Error) -> Self {
        NotifierError::Transport(e.to_string())
    }
}

impl From<futures::channel::mpsc::SendError> for NotifierError {
    fn from(_: futures::channel::mpsc::SendError) -> Self {
        NotifierError::ConnectionClosed
    }
}
