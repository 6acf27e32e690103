//! Health and stats endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

use crate::state::AppState;

/// Stages reported by the stats endpoint
const REPORTED_STAGES: &[&str] = &["user_turn", "llm", "transcode", "call_e2e"];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": if state.tracker.is_degraded() { "degraded" } else { "ok" },
        "active_calls": state.calls.count(),
        "cache_entries": state.cache.len(),
        "transcoder_pool": {
            "size": state.transcoder_pool.size(),
            "idle": state.transcoder_pool.idle_count(),
        },
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut stages = serde_json::Map::new();
    for stage in REPORTED_STAGES {
        if let Some(s) = state.tracker.stats(stage) {
            stages.insert(
                stage.to_string(),
                json!({
                    "count": s.count,
                    "avg_ms": s.avg_ms,
                    "min_ms": s.min_ms,
                    "max_ms": s.max_ms,
                    "p95_ms": s.p95_ms,
                    "errors": state.tracker.error_count(stage),
                }),
            );
        }
    }

    let (hits, misses) = state.tracker.cache_counts();
    Json(json!({
        "stages": stages,
        "cache": { "hits": hits, "misses": misses },
        "degraded": state.tracker.is_degraded(),
    }))
}
