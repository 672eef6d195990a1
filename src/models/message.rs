//! Message Models
//!
//! Persisted conversation entries and their extension bag.

use chat_relay_core::Citation;
use chat_relay_llm::{MessageRole, UsageStats};
use serde::{Deserialize, Serialize};

/// Soft-delete status of a stored message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Active,
    Deleted,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Active => "active",
            MessageStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(MessageStatus::Active),
            "deleted" => Some(MessageStatus::Deleted),
            _ => None,
        }
    }
}

/// Feedback left on an assistant answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    #[default]
    None,
    Like,
    Dislike,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::None => "none",
            Feedback::Like => "like",
            Feedback::Dislike => "dislike",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Feedback::None),
            "like" => Some(Feedback::Like),
            "dislike" => Some(Feedback::Dislike),
            _ => None,
        }
    }
}

/// Feedback request action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackAction {
    Like,
    Dislike,
    Cancel,
}

impl From<FeedbackAction> for Feedback {
    fn from(action: FeedbackAction) -> Self {
        match action {
            FeedbackAction::Like => Feedback::Like,
            FeedbackAction::Dislike => Feedback::Dislike,
            FeedbackAction::Cancel => Feedback::None,
        }
    }
}

/// The model that produced an assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotState {
    pub model: String,
    pub bot_id: String,
    pub bot_name: String,
}

/// One fenced code block, in the order it appeared in the answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSegment {
    pub index: u32,
    pub language: String,
    pub code: String,
}

/// Extension bag stored next to the message content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageExt {
    /// Content as generated, kept even when `content` is later blanked
    pub brief: String,
    pub think: String,
    pub suggest: String,
    pub citations: Vec<Citation>,
    pub code_segments: Vec<CodeSegment>,
    pub usage: Option<UsageStats>,
    pub sensitive: bool,
    pub bot_state: Option<BotState>,
}

/// A persisted conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub section_id: String,
    pub user_id: String,
    /// Message this one answers or follows; zero only for the first turn
    pub reply_id: i64,
    /// Ordinal within the conversation, strictly increasing
    pub index: i64,
    pub role: MessageRole,
    pub content: String,
    pub content_type: String,
    pub ext: MessageExt,
    pub feedback: Feedback,
    pub status: MessageStatus,
    /// Unix milliseconds
    pub created_at: i64,
    pub updated_at: i64,
}

pub const CONTENT_TYPE_TEXT: &str = "text";

impl Message {
    pub fn new(
        id: i64,
        conversation_id: impl Into<String>,
        section_id: impl Into<String>,
        user_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            conversation_id: conversation_id.into(),
            section_id: section_id.into(),
            user_id: user_id.into(),
            reply_id: 0,
            index: 0,
            role,
            content: content.into(),
            content_type: CONTENT_TYPE_TEXT.to_string(),
            ext: MessageExt::default(),
            feedback: Feedback::None,
            status: MessageStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_reply(mut self, reply_id: i64, index: i64) -> Self {
        self.reply_id = reply_id;
        self.index = index;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.content.is_empty()
    }

    /// Clear the visible content; the extension bag is left alone.
    pub fn blank(&mut self) {
        self.content.clear();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Backend-facing view of this message.
    pub fn to_llm(&self) -> chat_relay_llm::Message {
        chat_relay_llm::Message::new(self.role, self.content.clone())
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn parse_role(value: &str) -> Option<MessageRole> {
    match value {
        "system" => Some(MessageRole::System),
        "user" => Some(MessageRole::User),
        "assistant" => Some(MessageRole::Assistant),
        "tool" => Some(MessageRole::Tool),
        _ => None,
    }
}
