// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

pub mod auth;
mod context;
mod initialization;
mod metrics_server;
pub mod routes;
mod shutdown;
mod spawner;

pub use auth::VerifiedIdentity;
pub use routes::{app, router};
pub use shutdown::drain_sessions;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Build the shared state, load the schedule store and bind the listener.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Serve until a shutdown signal arrives.
    shutdown::serve(server_context).await
}
