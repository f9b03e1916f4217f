//! Liveness probe.

use axum::Json;
use serde_json::{Value, json};

pub const SERVICE_NAME: &str = "webhook-gateway";

/// `GET /health`. Touches no shared state, so it answers even while other
/// requests are stuck on slow upstreams.
pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok", "service": SERVICE_NAME}))
}
