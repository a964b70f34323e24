// src/server/shutdown.rs

//! Contains the main serving loop and the graceful shutdown sequence.

use super::context::ServerContext;
use super::routes;
use crate::connection::CloseReason;
use crate::core::Registry;
use anyhow::{Result, anyhow};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// How long shutdown waits for background tasks before giving up on them.
const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
/// How long shutdown waits for closed sessions to flush their close frames.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const SESSION_DRAIN_POLL: Duration = Duration::from_millis(10);

/// Serves the HTTP surface until a shutdown signal arrives, then tears everything down.
pub async fn serve(ctx: ServerContext) -> Result<()> {
    let ServerContext {
        state,
        listener,
        shutdown_tx,
        mut background_tasks,
    } = ctx;

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;

    let app = routes::app(state.clone());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop_rx.await.ok();
            })
            .await
    });

    let mut server_finished = false;
    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            Some(res) = background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = &mut server => {
                match res {
                    Ok(Ok(())) => warn!("HTTP server stopped unexpectedly."),
                    Ok(Err(e)) => error!("HTTP server failed: {}", e),
                    Err(e) => error!("HTTP server task panicked: {e:?}"),
                }
                server_finished = true;
                break;
            }
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if shutdown_tx.send(()).is_err() {
        warn!("No background task was listening for the shutdown signal.");
    }

    // Stop accepting first so no session is upgraded after `close_all`.
    let _ = stop_tx.send(());
    let closed = state.registry.close_all(CloseReason::shutdown());
    info!("Closed {} live sessions.", closed);

    if !server_finished {
        match server.await {
            Ok(Ok(())) => info!("HTTP server stopped."),
            Ok(Err(e)) => error!("HTTP server failed during shutdown: {}", e),
            Err(e) => error!("HTTP server task panicked: {e:?}"),
        }
    }

    // Sessions unregister once their write duty has sent the close frame.
    if !drain_sessions(&state.registry, SESSION_DRAIN_TIMEOUT).await {
        warn!(
            "{} sessions still registered after the drain timeout.",
            state.registry.len()
        );
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, async {
        while background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
    Ok(())
}

/// Polls until every session has unregistered. Returns `false` on timeout.
pub async fn drain_sessions(registry: &Registry, limit: Duration) -> bool {
    tokio::time::timeout(limit, async {
        while !registry.is_empty() {
            tokio::time::sleep(SESSION_DRAIN_POLL).await;
        }
    })
    .await
    .is_ok()
}
