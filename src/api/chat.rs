//! Chat completion endpoint
//!
//! Streams the pipeline's events as SSE, or returns the finished answer
//! as JSON when the request turns streaming off.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    Json,
};
use futures_util::StreamExt;
use tracing::debug;

use super::authenticate;
use crate::models::chat::ChatRequest;
use crate::models::event::SseFrame;
use crate::state::AppState;
use crate::utils::error::AppError;

pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let identity = authenticate(&state, &headers).await?;
    let stream = request.stream;
    let prepared = state.pipeline.prepare(&identity, request).await?;

    if !stream {
        let message = state.pipeline.complete(prepared).await?;
        return Ok(Json(message).into_response());
    }

    debug!(
        conversation_id = %prepared.ctx.conversation_id,
        "Opening completion stream"
    );
    let events = state
        .pipeline
        .start(prepared)
        .map(|frame| Ok::<_, Infallible>(to_event(frame)));
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.keep_alive))
        .into_response())
}

fn to_event(frame: SseFrame) -> Event {
    Event::default()
        .id(frame.id.to_string())
        .event(frame.kind.as_str())
        .data(frame.data)
}
