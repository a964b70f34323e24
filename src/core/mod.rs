// src/core/mod.rs

//! The central module containing the notification core: the registry of live
//! sessions, delivery, the wire envelope and the reminder task.

pub mod dispatcher;
pub mod errors;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod store;
pub mod tasks;

pub use dispatcher::{BroadcastReport, Dispatcher};
pub use errors::NotifierError;
pub use protocol::Envelope;
pub use registry::{Registry, Role};
