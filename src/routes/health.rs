use axum::{routing::get, Router, Extension, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::Hub;

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health(Extension(hub): Extension<Hub>) -> Json<Value> {
    let stats = hub.stats().await.unwrap_or_default();
    Json(json!({
        "status":      "ok",
        "timestamp":   Utc::now().to_rfc3339(),
        "rooms":       stats.rooms,
        "connections": stats.connections,
    }))
}
