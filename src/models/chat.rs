//! Chat Request Models
//!
//! Request body for the completion endpoint and the edit descriptor derived
//! from it.

use chat_relay_core::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};

/// A message identifier as sent by clients, either a JSON number or a
/// decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageRef {
    Number(i64),
    Text(String),
}

impl MessageRef {
    /// Parse into a positive message id.
    pub fn resolve(&self, field: &str) -> RelayResult<i64> {
        let id = match self {
            MessageRef::Number(n) => *n,
            MessageRef::Text(s) => s.trim().parse::<i64>().map_err(|_| {
                RelayError::invalid_reference(format!("{} '{}' is not a message id", field, s))
            })?,
        };
        if id <= 0 {
            return Err(RelayError::invalid_reference(format!(
                "{} must be positive, got {}",
                field, id
            )));
        }
        Ok(id)
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRequest {
    /// Empty starts a new conversation
    pub conversation_id: String,
    pub section_id: String,
    pub model: String,
    pub query: String,
    pub regen: bool,
    pub replace: bool,
    pub select_regen: bool,
    pub reply_id: Option<MessageRef>,
    pub selected_id: Option<MessageRef>,
    pub web_search: bool,
    /// `false` selects the non-streaming path
    pub stream: bool,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            conversation_id: String::new(),
            section_id: String::new(),
            model: String::new(),
            query: String::new(),
            regen: false,
            replace: false,
            select_regen: false,
            reply_id: None,
            selected_id: None,
            web_search: false,
            stream: true,
        }
    }
}

/// How a request modifies earlier turns of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditDescriptor {
    /// Append a new turn
    Default,
    /// Regenerate the answer to a turn. Without an explicit target the
    /// newest message's reply target is used.
    Regen { reply_id: Option<i64> },
    /// Replace the latest question and answer
    Replace,
    /// Keep one of several regenerated answers and continue from it
    SelectRegen { selected_id: i64 },
}

impl EditDescriptor {
    pub fn mode(&self) -> &'static str {
        match self {
            EditDescriptor::Default => "default",
            EditDescriptor::Regen { .. } => "regen",
            EditDescriptor::Replace => "replace",
            EditDescriptor::SelectRegen { .. } => "select_regen",
        }
    }

    /// Whether the edit appends a new user message.
    pub fn creates_user_message(&self) -> bool {
        !matches!(self, EditDescriptor::Regen { .. })
    }
}

impl ChatRequest {
    /// Derive the edit descriptor. At most one edit flag may be set.
    pub fn edit_descriptor(&self) -> RelayResult<EditDescriptor> {
        let flags = [self.regen, self.replace, self.select_regen]
            .iter()
            .filter(|f| **f)
            .count();
        if flags > 1 {
            return Err(RelayError::precondition(
                "regen, replace and selectRegen are mutually exclusive",
            ));
        }

        if self.regen {
            let reply_id = self
                .reply_id
                .as_ref()
                .map(|r| r.resolve("replyId"))
                .transpose()?;
            return Ok(EditDescriptor::Regen { reply_id });
        }
        if self.replace {
            return Ok(EditDescriptor::Replace);
        }
        if self.select_regen {
            let selected = self.selected_id.as_ref().ok_or_else(|| {
                RelayError::invalid_reference("selectRegen requires selectedId")
            })?;
            return Ok(EditDescriptor::SelectRegen {
                selected_id: selected.resolve("selectedId")?,
            });
        }
        Ok(EditDescriptor::Default)
    }
}
