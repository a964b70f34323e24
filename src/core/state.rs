// src/core/state.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use crate::config::Config;
use crate::core::dispatcher::Dispatcher;
use crate::core::registry::Registry;
use crate::core::store::ScheduleStore;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// The central struct holding all shared, server-wide state.
///
/// Created once at startup and passed in an `Arc` to every route handler, session and
/// background task. Tests build a fresh instance per case.
pub struct ServerState {
    /// The resolved runtime configuration.
    pub config: Arc<Config>,
    /// The table of live connections.
    pub registry: Arc<Registry>,
    /// Targeted and broadcast delivery over `registry`.
    pub dispatcher: Dispatcher,
    /// The schedule store the reminder task queries.
    pub store: Arc<dyn ScheduleStore>,
    /// One permit per live session, bounding concurrent connections to `max_clients`.
    pub connection_permits: Arc<Semaphore>,
}

impl ServerState {
    pub fn new(config: Config, store: Arc<dyn ScheduleStore>) -> Self {
        let registry = Arc::new(Registry::new());
        let connection_permits = Arc::new(Semaphore::new(config.max_clients));
        Self {
            config: Arc::new(config),
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            store,
            connection_permits,
        }
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("registry", &self.registry.counts())
            .field(
                "available_permits",
                &self.connection_permits.available_permits(),
            )
            .finish_non_exhaustive()
    }
}
