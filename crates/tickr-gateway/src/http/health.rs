use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness check, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let scheduler = &state.config.scheduler;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "poll_interval_ms": scheduler.poll_interval_ms,
        "max_concurrent_runs": scheduler.max_concurrent_runs,
    }))
}
