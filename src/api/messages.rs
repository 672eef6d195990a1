//! Message history endpoints

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use super::authenticate;
use crate::models::message::{FeedbackAction, Message};
use crate::state::AppState;
use crate::storage::MessagePage;
use crate::utils::error::{AppError, AppResult};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Message index to page back from, exclusive
    pub cursor: Option<i64>,
    pub size: Option<usize>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<MessagePage>> {
    let identity = authenticate(&state, &headers).await?;
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let page = state
        .store
        .paginate(&conversation_id, query.cursor, size)
        .await?;
    if page.messages.iter().any(|m| m.user_id != identity.user_id) {
        return Err(AppError::not_found(format!(
            "conversation {}",
            conversation_id
        )));
    }
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub action: FeedbackAction,
}

pub async fn set_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<i64>,
    Json(body): Json<FeedbackRequest>,
) -> AppResult<Json<Message>> {
    let identity = authenticate(&state, &headers).await?;
    let message = state
        .store
        .set_feedback(message_id, &identity.user_id, body.action)
        .await?;
    Ok(Json(message))
}
