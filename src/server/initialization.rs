// src/server/initialization.rs

//! Handles server initialization: building the shared state, loading the schedule
//! store and binding the listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ServerState;
use crate::core::store::{InMemoryStore, ScheduleStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let store = load_store(&config)?;
    let bind_addr = config.bind_addr();
    let state = Arc::new(ServerState::new(config, store));
    info!("Server state initialized.");

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!("Slipstream server listening on {}", bind_addr);

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Builds the schedule store, seeded from `store.seed_path` when configured.
fn load_store(config: &Config) -> Result<Arc<dyn ScheduleStore>> {
    let store = match &config.store.seed_path {
        Some(path) => {
            let store = InMemoryStore::from_seed_file(path)?;
            info!(
                "Loaded {} schedules and {} students from {}.",
                store.schedule_count(),
                store.student_count(),
                path.display()
            );
            store
        }
        None => {
            if config.reminders.enabled {
                warn!("No store.seed_path configured; class reminders will find no schedules.");
            }
            InMemoryStore::new()
        }
    };
    Ok(Arc::new(store))
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Sessions: queue capacity {}, ping every {:?}, read timeout {:?}, write timeout {:?}.",
        config.session.outbound_queue_capacity,
        config.session.ping_interval,
        config.session.read_timeout,
        config.session.write_timeout
    );
    info!("Accepting at most {} concurrent sessions.", config.max_clients);
    if config.ingress.token.is_none() {
        warn!("No ingress.token configured; internal event endpoints are unauthenticated.");
    }
}
