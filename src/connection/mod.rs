// src/connection/mod.rs

//! Manages the lifecycle of a single client session: the shared `Connection` handle,
//! the read and write duties that drive it, and the frame transport beneath them.

// Declare the sub-modules of the `connection` module.
mod guard;
mod handler;
mod session;
pub mod transport;

// Publicly re-export the primary types from the sub-modules.
pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::{Connection, ConnectionId, EnqueueError, OutboundReceiver};
pub use transport::{CloseReason, Frame, MemoryPeer, MemoryTransport, Transport, WsTransport};
