// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use serde_json::Value;
use slipstream::config::Config;
use slipstream::connection::{
    CloseReason, Connection, ConnectionHandler, Frame, MemoryPeer, MemoryTransport,
    OutboundReceiver,
};
use slipstream::core::Role;
use slipstream::core::dispatcher::Dispatcher;
use slipstream::core::registry::Registry;
use slipstream::core::state::ServerState;
use slipstream::core::store::{InMemoryStore, ScheduledEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// How long a test waits for a frame before giving up.
pub const FRAME_WAIT: Duration = Duration::from_secs(5);

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    // Initialize tracing (ignore error if already initialized)
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// TestContext provides a server state backed by an in-memory schedule store.
pub struct TestContext {
    pub state: Arc<ServerState>,
    pub store: Arc<InMemoryStore>,
}

impl TestContext {
    /// Creates a new test context with default configuration
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a new test context with custom configuration
    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let state = Arc::new(ServerState::new(config, store.clone()));
        Self { state, store }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.state.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.state.dispatcher
    }

    /// Registers a bare connection, with no session running, and hands back its queue.
    pub fn connect(&self, identity: &str, role: Role) -> (Arc<Connection>, OutboundReceiver) {
        let capacity = self.state.config.session.outbound_queue_capacity;
        let (conn, rx) = Connection::new(identity, role, capacity);
        self.registry().register(conn.clone());
        (conn, rx)
    }

    /// Starts a full session over an in-memory transport.
    pub fn open_session(&self, identity: &str, role: Role) -> TestSession {
        let (transport, peer) = MemoryTransport::pair();
        let handler = ConnectionHandler::accept(
            self.registry().clone(),
            identity,
            role,
            transport,
            self.state.config.session.clone(),
        );
        let conn = handler.connection().clone();
        let handle = tokio::spawn(handler.run());
        TestSession { conn, peer, handle }
    }
}

/// A running session and the client end of its transport.
pub struct TestSession {
    pub conn: Arc<Connection>,
    pub peer: MemoryPeer,
    pub handle: JoinHandle<Option<CloseReason>>,
}

impl TestSession {
    /// The next frame the server wrote, failing the test after `FRAME_WAIT`.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(FRAME_WAIT, self.peer.next_frame())
            .await
            .expect("timed out waiting for a frame")
    }

    /// The next text frame parsed as JSON, skipping control frames.
    pub async fn next_envelope(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Frame::Text(text)) => {
                    return serde_json::from_str(&text).expect("server sent invalid JSON");
                }
                Some(Frame::Close(reason)) => panic!("session closed early: {reason:?}"),
                Some(_) => continue,
                None => panic!("transport dropped before a text frame arrived"),
            }
        }
    }

    /// Reads frames until the close frame and returns its reason.
    pub async fn expect_close(&mut self) -> Option<CloseReason> {
        loop {
            match self.next_frame().await {
                Some(Frame::Close(reason)) => return reason,
                Some(_) => continue,
                None => panic!("transport dropped without a close frame"),
            }
        }
    }

    /// Waits for the session task to finish and returns its close reason.
    pub async fn finished(self) -> Option<CloseReason> {
        tokio::time::timeout(FRAME_WAIT, self.handle)
            .await
            .expect("session did not end in time")
            .expect("session task panicked")
    }
}

/// Session settings with short timers for liveness tests.
pub fn fast_session_config(ping: Duration, read: Duration, write: Duration) -> Config {
    let mut config = Config::default();
    config.session.ping_interval = ping;
    config.session.read_timeout = read;
    config.session.write_timeout = write;
    config
}

/// Builds a schedule record.
pub fn event(module_code: &str, day: &str, start_time: &str, level: &str) -> ScheduledEvent {
    ScheduledEvent {
        module_code: module_code.to_string(),
        module_name: format!("{module_code} lecture"),
        start_time: start_time.to_string(),
        day: day.to_string(),
        room: "B-201".to_string(),
        level: level.to_string(),
    }
}

/// Drains every message currently queued for a bare connection.
pub fn drain(rx: &mut OutboundReceiver) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(serde_json::from_str(&text).expect("queued message is valid JSON"));
    }
    out
}

/// Serves `app(state)` on an ephemeral local port.
pub async fn spawn_server(state: Arc<ServerState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no address");
    tokio::spawn(async move {
        axum::serve(listener, slipstream::server::app(state))
            .await
            .expect("test server failed");
    });
    addr
}
