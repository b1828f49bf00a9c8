use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::json;

use crate::server::AppState;

/// Health check endpoint handler.
///
/// # Route
/// - **Method**: GET
/// - **Path**: `/ping`
///
/// # Response Format
/// ```json
/// {
///   "status": "pong"
/// }
/// ```
///
/// Used by load balancers and liveness checks; does no work beyond replying.
pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "pong" }))
}

/// Keeper status endpoint handler.
///
/// # Route
/// - **Method**: GET
/// - **Path**: `/status`
///
/// # Response Format
/// ```json
/// {
///   "mode": "live",
///   "last_cycle": { "cycle_id": "...", "outcome": { "outcome": "completed", ... }, ... }
/// }
/// ```
///
/// `last_cycle` is `null` until the first cycle finishes.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mode = if state.mode.is_simulated() { "dry_run" } else { "live" };
    Json(json!({
        "mode": mode,
        "last_cycle": state.observer.last_cycle(),
    }))
}
