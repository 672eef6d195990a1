//! Persistence Completion
//!
//! Fills the assistant placeholder from the accumulated buffers and writes
//! the exchange back. Runs after the stream has closed, so failures are
//! logged and never reach the client.

use chat_relay_core::RelayError;
use tracing::{debug, error};

use super::context::RelayContext;
use crate::models::message::{Message, MessageExt};
use crate::storage::MessageStore;

/// Build the finished assistant message from the context's buffers.
pub fn complete_assistant(ctx: &RelayContext, mut assistant: Message) -> Message {
    let buffers = &ctx.buffers;
    assistant.ext = MessageExt {
        brief: buffers.text.clone(),
        think: buffers.think.clone(),
        suggest: buffers.suggest.clone(),
        citations: buffers.citations.clone(),
        code_segments: buffers.code_segments.clone(),
        usage: buffers.usage,
        sensitive: buffers.sensitive,
        bot_state: Some(ctx.model.bot_state()),
    };
    assistant.content = if buffers.sensitive {
        String::new()
    } else {
        buffers.text.clone()
    };
    assistant.touch();
    assistant
}

/// Write edited history first, then the user message and finished answer.
/// Returns the finished answer whether or not the writes succeeded.
pub async fn persist_exchange(
    store: &dyn MessageStore,
    ctx: &RelayContext,
    to_update: Vec<Message>,
    user_message: Option<Message>,
    assistant: Message,
) -> Message {
    let assistant = complete_assistant(ctx, assistant);

    if !to_update.is_empty() {
        if let Err(e) = store.update_many(&to_update).await {
            let err = RelayError::from(e);
            error!(
                conversation_id = %ctx.conversation_id,
                code = err.code(),
                count = to_update.len(),
                "[Pipeline] failed to update edited messages: {}",
                err
            );
        }
    }

    let mut exchange: Vec<Message> = user_message.into_iter().collect();
    exchange.push(assistant.clone());
    match store.update_many(&exchange).await {
        Ok(()) => debug!(
            conversation_id = %ctx.conversation_id,
            message_id = assistant.id,
            "[Pipeline] exchange persisted"
        ),
        Err(e) => {
            let err = RelayError::from(e);
            error!(
                conversation_id = %ctx.conversation_id,
                message_id = assistant.id,
                code = err.code(),
                "[Pipeline] failed to persist exchange: {}",
                err
            );
        }
    }
    assistant
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::EditDescriptor;
    use crate::services::relay::context::ModelSelection;
    use crate::storage::{Database, SqliteMessageStore};
    use chat_relay_core::CanonicalDelta;
    use chat_relay_llm::MessageRole;

    fn context() -> RelayContext {
        RelayContext::new(
            "c1",
            "s1",
            "u1",
            EditDescriptor::Default,
            ModelSelection {
                model_id: "qwen".into(),
                bot_id: "bot-qw".into(),
                bot_name: "Qwen".into(),
            },
        )
    }

    fn placeholder() -> Message {
        Message::new(2, "c1", "s1", "u1", MessageRole::Assistant, "").with_reply(1, 1)
    }

    #[test]
    fn test_content_is_accumulated_text() {
        let mut ctx = context();
        ctx.buffers.push(&CanonicalDelta::think("plan"));
        ctx.buffers.push(&CanonicalDelta::text("Hello "));
        ctx.buffers.push(&CanonicalDelta::text("world"));
        ctx.buffers.record_usage(3, 2, None);

        let done = complete_assistant(&ctx, placeholder());
        assert_eq!(done.content, "Hello world");
        assert_eq!(done.ext.brief, "Hello world");
        assert_eq!(done.ext.think, "plan");
        assert_eq!(done.ext.usage.map(|u| u.output_tokens), Some(2));
        assert_eq!(done.ext.bot_state.unwrap().bot_id, "bot-qw");
    }

    #[test]
    fn test_sensitive_answer_keeps_audit_data() {
        let mut ctx = context();
        ctx.buffers.push(&CanonicalDelta::text("forbidden words"));
        ctx.buffers.sensitive = true;

        let done = complete_assistant(&ctx, placeholder());
        assert!(done.content.is_empty());
        assert!(done.ext.sensitive);
        assert_eq!(done.ext.brief, "forbidden words");
    }

    #[tokio::test]
    async fn test_persist_writes_both_messages() {
        let store = SqliteMessageStore::new(Database::new_in_memory().unwrap());
        let mut ctx = context();
        ctx.buffers.push(&CanonicalDelta::text("answer"));
        let user = Message::new(1, "c1", "s1", "u1", MessageRole::User, "question");

        let done = persist_exchange(&store, &ctx, Vec::new(), Some(user), placeholder()).await;
        assert_eq!(done.content, "answer");

        let stored = store.find_all("c1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].content, "answer");
        assert_eq!(stored[1].content, "question");
    }
}
