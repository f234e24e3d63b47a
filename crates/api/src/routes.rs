use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tapeflow_core::ControlCommand;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/snapshot", get(current_snapshot))
        .route("/signals/{instrument}", get(signal_history))
        .route("/control", post(control))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot();
    Json(serde_json::json!({
        "status": snapshot.health,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Snapshot & signals
// ---------------------------------------------------------------------------

async fn current_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.snapshot().as_ref().clone())
}

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn signal_history(
    State(state): State<Arc<AppState>>,
    Path(instrument): Path<String>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    Json(state.engine.signals(&instrument, params.limit))
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ControlRequest {
    command: ControlCommand,
}

async fn control(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ControlRequest>,
) -> impl IntoResponse {
    match state.engine.control(req.command).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "status": "accepted",
                "command": req.command,
            })),
        ),
        // The engine is gone; report rejection, never a raw error.
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "rejected",
                "command": req.command,
            })),
        ),
    }
}
