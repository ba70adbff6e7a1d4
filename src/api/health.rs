use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a non-secret config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "chat-relay is running",
        "config": {
            "upstream_base_url": state.upstream.prepared().base_url().as_str(),
            "segmentation": state.segmenter().name(),
            "features": {
                "log_level": config.features.log_level,
                "log_format": config.features.log_format.to_string(),
            }
        }
    }))
}
