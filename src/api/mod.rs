//! API routes and handlers

mod asr;
mod chat;
mod health;
mod messages;

use axum::{
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::services::auth::Identity;
use crate::state::AppState;
use crate::utils::error::AppResult;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Completion
        .route("/chat", post(chat::chat))
        // History
        .route(
            "/conversations/:id/messages",
            get(messages::list_messages),
        )
        .route("/messages/:id/feedback", post(messages::set_feedback))
        // Speech recognition relay
        .route("/asr", get(asr::asr_socket));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Verify the bearer token in the `Authorization` header.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<Identity> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    Ok(state.verifier.verify(token).await?)
}
