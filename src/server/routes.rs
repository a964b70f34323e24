// src/server/routes.rs

//! The HTTP surface: WebSocket endpoints, the connected-clients status route and the
//! internal endpoints through which the rest of the application raises domain events.

use super::auth::{self, VerifiedIdentity};
use crate::connection::{ConnectionHandler, WsTransport};
use crate::core::dispatcher::BroadcastReport;
use crate::core::protocol::{LateSlip, LateSlipStatusUpdate};
use crate::core::state::ServerState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Errors the HTTP surface reports to callers, as `{"error": "..."}` bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    TooManyConnections,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden"),
            ApiError::TooManyConnections => {
                (StatusCode::SERVICE_UNAVAILABLE, "Too many connections")
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// The routes, expecting an upstream layer to provide `VerifiedIdentity`.
pub fn router(state: Arc<ServerState>) -> Router {
    let student = Router::new()
        .route("/student/ws", get(upgrade_session))
        .route_layer(middleware::from_fn(auth::require_student));

    let admin = Router::new()
        .route("/admin/ws", get(upgrade_session))
        .route("/admin/notifications/status", get(connection_status))
        .route_layer(middleware::from_fn(auth::require_admin));

    let internal = Router::new()
        .route("/internal/late-slips", post(new_late_slip))
        .route("/internal/late-slips/status", post(late_slip_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_ingress_token,
        ));

    Router::new()
        .merge(student)
        .merge(admin)
        .merge(internal)
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// The routes with identity taken from the configured gateway headers.
pub fn app(state: Arc<ServerState>) -> Router {
    router(state.clone()).layer(middleware::from_fn_with_state(
        state,
        auth::trusted_header_auth,
    ))
}

/// Upgrades an authorized request to a WebSocket session and runs it to completion.
async fn upgrade_session(
    State(state): State<Arc<ServerState>>,
    Extension(verified): Extension<VerifiedIdentity>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let permit = state
        .connection_permits
        .clone()
        .try_acquire_owned()
        .map_err(|_| {
            warn!(
                identity = %verified.identity,
                "Rejecting session: max_clients reached."
            );
            ApiError::TooManyConnections
        })?;

    let settings = state.config.session.clone();
    let registry = state.registry.clone();
    Ok(ws
        .max_message_size(settings.max_message_bytes)
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            ConnectionHandler::accept(
                registry,
                &verified.identity,
                verified.role,
                WsTransport::new(socket),
                settings,
            )
            .with_permit(permit)
            .run()
            .await;
        }))
}

async fn connection_status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let counts = state.registry.counts();
    Json(json!({
        "students": counts.students,
        "admins": counts.admins,
        "total": counts.total(),
    }))
}

async fn new_late_slip(
    State(state): State<Arc<ServerState>>,
    Json(slip): Json<LateSlip>,
) -> Json<BroadcastReport> {
    let report = state.dispatcher.notify_new_late_slip(&slip);
    Json(report)
}

async fn late_slip_status(
    State(state): State<Arc<ServerState>>,
    Json(update): Json<LateSlipStatusUpdate>,
) -> impl IntoResponse {
    let delivered = state.dispatcher.notify_late_slip_status(&update);
    debug!(
        late_slip_id = %update.id,
        student_id = %update.student_id,
        delivered,
        "Late slip status change dispatched."
    );
    Json(json!({ "delivered": delivered }))
}
