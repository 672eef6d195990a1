//! Wire Event Models
//!
//! Server-push events produced by the completion pipeline. Every frame
//! carries the pipeline-local sequence id, an event type and a JSON (or
//! decimal) payload.

use serde::{Deserialize, Serialize};

/// Event type names on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Meta,
    Model,
    Chat,
    SearchStart,
    SearchFind,
    SearchChoose,
    SearchCite,
    SearchEnd,
    End,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Meta => "meta",
            EventKind::Model => "model",
            EventKind::Chat => "chat",
            EventKind::SearchStart => "searchStart",
            EventKind::SearchFind => "searchFind",
            EventKind::SearchChoose => "searchChoose",
            EventKind::SearchCite => "searchCite",
            EventKind::SearchEnd => "searchEnd",
            EventKind::End => "end",
            EventKind::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::End | EventKind::Error)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One server-push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: u64,
    pub kind: EventKind,
    pub data: String,
}

/// Payload of the fixed `{}` sentinel events.
pub const EMPTY_PAYLOAD: &str = "{}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaPayload {
    pub conversation_id: String,
    pub section_id: String,
    /// Absent when the request regenerates an earlier answer
    pub user_message_id: Option<i64>,
    pub message_id: i64,
    pub reply_id: i64,
    pub message_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPayload {
    pub model: String,
    pub bot_id: String,
    pub bot_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContent {
    pub content: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub message: ChatContent,
    pub conversation_id: String,
    pub section_id: String,
    pub reply_id: i64,
    pub is_delta: bool,
    pub status: String,
    pub message_index: i64,
    pub bot_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
