//! Health check endpoint

use axum::{extract::State, Json};

use crate::models::response::HealthResponse;
use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::probe(
        state.is_database_healthy(),
        state.backend_count(),
        state.audio.is_some(),
    ))
}
