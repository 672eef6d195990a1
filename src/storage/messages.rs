//! Message Store
//!
//! The keyed message store consumed by the completion pipeline, plus its
//! SQLite implementation. SQLite calls run on the blocking pool.

use async_trait::async_trait;
use chat_relay_core::RelayError;
use chat_relay_llm::MessageRole;
use serde::Serialize;

use super::database::Database;
use crate::models::message::{now_millis, Feedback, FeedbackAction, Message};
use crate::utils::error::{AppError, AppResult};

/// One page of a conversation, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    /// Pass back as `cursor` to fetch older messages
    pub next_cursor: Option<i64>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Allocate a fresh message id.
    async fn next_id(&self) -> AppResult<i64>;

    /// Active messages of a conversation, newest first.
    async fn find_all(&self, conversation_id: &str) -> AppResult<Vec<Message>>;

    async fn insert(&self, message: &Message) -> AppResult<()>;

    /// Upsert a batch atomically.
    async fn update_many(&self, messages: &[Message]) -> AppResult<()>;

    /// Page backwards from `cursor` (a message index, exclusive).
    async fn paginate(
        &self,
        conversation_id: &str,
        cursor: Option<i64>,
        size: usize,
    ) -> AppResult<MessagePage>;

    /// Record `user_id`'s feedback on one of their assistant messages and
    /// return the updated row.
    async fn set_feedback(
        &self,
        message_id: i64,
        user_id: &str,
        action: FeedbackAction,
    ) -> AppResult<Message>;
}

/// [`MessageStore`] backed by the SQLite [`Database`].
#[derive(Clone, Debug)]
pub struct SqliteMessageStore {
    db: Database,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn blocking<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Database) -> AppResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| AppError::internal(format!("storage task failed: {}", e)))?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn next_id(&self) -> AppResult<i64> {
        self.blocking(|db| db.next_message_id()).await
    }

    async fn find_all(&self, conversation_id: &str) -> AppResult<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        self.blocking(move |db| db.find_messages(&conversation_id))
            .await
    }

    async fn insert(&self, message: &Message) -> AppResult<()> {
        let message = message.clone();
        self.blocking(move |db| db.insert_message(&message)).await
    }

    async fn update_many(&self, messages: &[Message]) -> AppResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let messages = messages.to_vec();
        self.blocking(move |db| db.upsert_messages(&messages)).await
    }

    async fn paginate(
        &self,
        conversation_id: &str,
        cursor: Option<i64>,
        size: usize,
    ) -> AppResult<MessagePage> {
        if size == 0 {
            return Err(AppError::validation("page size must be at least 1"));
        }
        let conversation_id = conversation_id.to_string();
        let (messages, has_more) = self
            .blocking(move |db| db.page_messages(&conversation_id, cursor, size))
            .await?;
        let next_cursor = if has_more {
            messages.last().map(|m| m.index)
        } else {
            None
        };
        Ok(MessagePage {
            messages,
            has_more,
            next_cursor,
        })
    }

    async fn set_feedback(
        &self,
        message_id: i64,
        user_id: &str,
        action: FeedbackAction,
    ) -> AppResult<Message> {
        let user_id = user_id.to_string();
        self.blocking(move |db| {
            let mut message = db
                .get_message(message_id)?
                .filter(|m| m.user_id == user_id)
                .ok_or_else(|| AppError::not_found(format!("message {}", message_id)))?;
            if message.role != MessageRole::Assistant {
                return Err(RelayError::precondition(format!(
                    "message {} is not an assistant answer",
                    message_id
                ))
                .into());
            }
            message.feedback = Feedback::from(action);
            message.updated_at = now_millis();
            db.update_feedback(message.id, message.feedback, message.updated_at)?;
            Ok(message)
        })
        .await
    }
}
