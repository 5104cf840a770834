//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use history::HistoryStore;
use serde::{Deserialize, Serialize};

use crate::routes::transfers::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub namespace: String,
    pub task_queue: String,
    pub live_runs: usize,
}

/// GET /health: returns worker health and load.
pub async fn check<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let worker = state.engine.orchestrator().worker();
    Json(HealthResponse {
        status: "ok".to_string(),
        namespace: worker.namespace().to_string(),
        task_queue: worker.task_queue().to_string(),
        live_runs: state.engine.live_runs(),
    })
}
