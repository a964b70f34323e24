// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::tasks::class_reminder::ClassReminderTask;
use tracing::info;

/// Spawns all background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) {
    let server_state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;
    let config = server_state.config.clone();

    // --- Metrics Server ---
    if config.metrics.enabled {
        let metrics_state = server_state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Class Reminders ---
    if config.reminders.enabled {
        let reminder_task = ClassReminderTask::new(
            server_state.dispatcher.clone(),
            server_state.store.clone(),
            config.reminders.clone(),
        );
        let shutdown_rx_reminders = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            reminder_task.run(shutdown_rx_reminders).await;
            Ok(())
        });
    } else {
        info!("Class reminders are disabled in the configuration.");
    }

    info!("All background tasks have been spawned.");
}
