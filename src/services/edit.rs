//! Edit-Option Resolver
//!
//! Applies an [`EditDescriptor`] to a conversation's history: decides which
//! stored messages are blanked or restored, and builds the new user message
//! and assistant placeholder for this turn.

use chat_relay_core::{RelayError, RelayResult};
use chat_relay_llm::MessageRole;

use crate::models::chat::EditDescriptor;
use crate::models::message::Message;

/// Identifiers allocated for the messages this turn creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewIds {
    /// Required unless the edit is a regeneration
    pub user: Option<i64>,
    pub assistant: i64,
}

/// Who and where the new messages belong to.
#[derive(Debug, Clone)]
pub struct TurnScope<'a> {
    pub conversation_id: &'a str,
    pub section_id: &'a str,
    pub user_id: &'a str,
    pub query: &'a str,
}

/// Result of applying an edit.
#[derive(Debug, Clone)]
pub struct EditOutcome {
    /// Model input, oldest first, blank messages removed; ends with the
    /// question being answered
    pub history: Vec<Message>,
    /// Existing messages changed by the edit, upserted before the new turn
    pub to_update: Vec<Message>,
    /// Absent under regeneration
    pub user_message: Option<Message>,
    /// Empty placeholder for the answer
    pub assistant: Message,
}

impl EditOutcome {
    /// Id the answer replies to.
    pub fn reply_id(&self) -> i64 {
        self.assistant.reply_id
    }
}

/// Apply `descriptor` to `history` (newest first).
pub fn resolve_edit(
    descriptor: EditDescriptor,
    mut history: Vec<Message>,
    scope: &TurnScope<'_>,
    ids: NewIds,
) -> RelayResult<EditOutcome> {
    if descriptor.creates_user_message() && scope.query.trim().is_empty() {
        return Err(RelayError::precondition("query must not be empty"));
    }

    let next_index = history.first().map(|m| m.index + 1).unwrap_or(0);
    let mut to_update = Vec::new();
    let mut regen_anchor = None;

    match descriptor {
        EditDescriptor::Default => {}
        EditDescriptor::Regen { reply_id } => {
            let target = match (reply_id, history.first()) {
                (_, None) => return Err(RelayError::precondition("nothing to regenerate")),
                (Some(id), _) => id,
                (None, Some(newest)) => newest.reply_id,
            };
            for msg in history.iter_mut() {
                if msg.role == MessageRole::User && !msg.is_blank() {
                    regen_anchor = Some(msg.id);
                    break;
                }
                if msg.reply_id == target && !msg.is_blank() {
                    msg.blank();
                    to_update.push(msg.clone());
                }
            }
            match (reply_id, regen_anchor) {
                (_, None) => {
                    return Err(RelayError::precondition(
                        "no question found to regenerate an answer for",
                    ));
                }
                // Only the latest question can be answered again.
                (Some(id), Some(anchor)) if id != anchor => {
                    return Err(RelayError::invalid_reference(format!(
                        "message {} is not the latest question",
                        id
                    )));
                }
                _ => {}
            }
        }
        EditDescriptor::Replace => {
            for msg in history.iter_mut().filter(|m| !m.is_blank()).take(2) {
                msg.blank();
                to_update.push(msg.clone());
            }
        }
        EditDescriptor::SelectRegen { selected_id } => {
            let group = history
                .first()
                .map(|m| m.reply_id)
                .ok_or_else(|| RelayError::precondition("nothing to select from"))?;
            if !history
                .iter()
                .any(|m| m.id == selected_id && m.reply_id == group)
            {
                return Err(RelayError::invalid_reference(format!(
                    "message {} is not one of the latest alternatives",
                    selected_id
                )));
            }
            for msg in history.iter_mut().filter(|m| m.reply_id == group) {
                if msg.id == selected_id {
                    // Answers blocked by moderation stay blank.
                    if !msg.ext.sensitive {
                        msg.content = msg.ext.brief.clone();
                    }
                    msg.touch();
                } else {
                    msg.blank();
                }
                to_update.push(msg.clone());
            }
        }
    }

    let user_message = match (descriptor.creates_user_message(), ids.user) {
        (false, _) => None,
        (true, None) => {
            return Err(RelayError::internal("no id allocated for the user message"));
        }
        (true, Some(id)) => {
            let reply_to = history
                .iter()
                .find(|m| !m.is_blank())
                .map(|m| m.id)
                .unwrap_or(0);
            Some(
                Message::new(
                    id,
                    scope.conversation_id,
                    scope.section_id,
                    scope.user_id,
                    MessageRole::User,
                    scope.query,
                )
                .with_reply(reply_to, next_index),
            )
        }
    };

    let (answer_to, answer_index) = match (&user_message, regen_anchor) {
        (Some(user), _) => (user.id, user.index + 1),
        (None, Some(anchor)) => (anchor, next_index),
        (None, None) => return Err(RelayError::internal("edit produced no reply target")),
    };
    let assistant = Message::new(
        ids.assistant,
        scope.conversation_id,
        scope.section_id,
        scope.user_id,
        MessageRole::Assistant,
        "",
    )
    .with_reply(answer_to, answer_index);

    history.reverse();
    history.retain(|m| !m.is_blank());
    if let Some(user) = &user_message {
        history.push(user.clone());
    }

    Ok(EditOutcome {
        history,
        to_update,
        user_message,
        assistant,
    })
}
