//! Unified Stream Event Types
//!
//! Provider-agnostic delta and event types produced by the per-backend
//! content classifiers. Backends differ in how they mark reasoning, suggestions
//! and code; after classification every fragment carries exactly one
//! [`ContentType`] and the rest of the pipeline never looks at provider formats.

use serde::{Deserialize, Serialize};

/// Content kind of a canonical delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Ordinary answer text
    Text,
    /// Internal reasoning ("thinking")
    Think,
    /// Follow-up suggestion
    Suggest,
    /// Opening code fence; payload is the language tag
    CodeFence,
    /// Body of the currently open code block
    CodeBody,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Text => write!(f, "text"),
            ContentType::Think => write!(f, "think"),
            ContentType::Suggest => write!(f, "suggest"),
            ContentType::CodeFence => write!(f, "code_fence"),
            ContentType::CodeBody => write!(f, "code_body"),
        }
    }
}

/// A backend delta normalized to one content kind.
///
/// Code deltas carry the index of the code segment they belong to. A
/// `CodeBody` is only ever produced after the `CodeFence` with the same index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalDelta {
    Text { text: String },
    Think { text: String },
    Suggest { text: String },
    CodeFence { language: String, index: u32 },
    CodeBody { text: String, index: u32 },
}

impl CanonicalDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn think(text: impl Into<String>) -> Self {
        Self::Think { text: text.into() }
    }

    pub fn suggest(text: impl Into<String>) -> Self {
        Self::Suggest { text: text.into() }
    }

    /// Build a delta of the given inline kind. Code kinds are not inline
    /// and fall back to text.
    pub fn inline(content_type: ContentType, text: impl Into<String>) -> Self {
        match content_type {
            ContentType::Think => Self::think(text),
            ContentType::Suggest => Self::suggest(text),
            _ => Self::text(text),
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            CanonicalDelta::Text { .. } => ContentType::Text,
            CanonicalDelta::Think { .. } => ContentType::Think,
            CanonicalDelta::Suggest { .. } => ContentType::Suggest,
            CanonicalDelta::CodeFence { .. } => ContentType::CodeFence,
            CanonicalDelta::CodeBody { .. } => ContentType::CodeBody,
        }
    }

    /// The wire payload: the text, or the language tag for a fence.
    pub fn payload(&self) -> &str {
        match self {
            CanonicalDelta::Text { text }
            | CanonicalDelta::Think { text }
            | CanonicalDelta::Suggest { text }
            | CanonicalDelta::CodeBody { text, .. } => text,
            CanonicalDelta::CodeFence { language, .. } => language,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CanonicalDelta::CodeFence { .. } => false,
            _ => self.payload().is_empty(),
        }
    }
}

/// Event emitted by a backend producer into its delta pipe.
///
/// A well-behaved producer sends exactly one terminal event (`Complete` or
/// `Error`) and nothing after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamEvent {
    /// Classified content
    Delta { delta: CanonicalDelta },

    /// Token usage information
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        thinking_tokens: Option<u32>,
    },

    /// Fatal upstream error; terminal
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream complete; terminal
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl UnifiedStreamEvent {
    pub fn delta(delta: CanonicalDelta) -> Self {
        Self::Delta { delta }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnifiedStreamEvent::Error { .. } | UnifiedStreamEvent::Complete { .. }
        )
    }
}

/// A search citation attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Position by arrival order
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub site_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Errors that can occur during stream adaptation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AdapterError {
    /// Invalid format that couldn't be parsed
    InvalidFormat(String),
    /// JSON/data parsing error
    ParseError(String),
    /// The upstream reported an error inside the stream
    Upstream(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            AdapterError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AdapterError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    /// Malformed input is dropped with a warning; upstream errors end the stream.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AdapterError::Upstream(_))
    }
}

/// Trait for adapting provider-specific stream lines to unified events.
///
/// Each backend protocol has its own implementation holding whatever small
/// state machine it needs (think tags, code fences, reasoning side channel).
pub trait StreamAdapter: Send {
    /// Returns the provider name for logging and identification.
    fn provider_name(&self) -> &'static str;

    /// Returns whether this adapter can emit `Think` deltas.
    fn supports_thinking(&self) -> bool;

    /// Adapt a raw stream line to unified events.
    ///
    /// A single input line may produce zero, one, or multiple events.
    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError>;

    /// Flush any content withheld for lookahead once the upstream has ended.
    fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        Vec::new()
    }

    /// Reset adapter state for a new stream.
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_event_serialization() {
        let event = UnifiedStreamEvent::delta(CanonicalDelta::think("hmm"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"delta\""));
        assert!(json.contains("\"text\":\"hmm\""));

        let parsed: UnifiedStreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(CanonicalDelta::text("a").content_type(), ContentType::Text);
        assert_eq!(
            CanonicalDelta::CodeFence {
                language: "rust".into(),
                index: 0
            }
            .content_type(),
            ContentType::CodeFence
        );
        assert_eq!(
            CanonicalDelta::inline(ContentType::Suggest, "x"),
            CanonicalDelta::suggest("x")
        );
    }

    #[test]
    fn test_fence_payload_is_language() {
        let fence = CanonicalDelta::CodeFence {
            language: "python".into(),
            index: 2,
        };
        assert_eq!(fence.payload(), "python");
        assert!(!fence.is_empty());
        assert!(CanonicalDelta::text("").is_empty());
    }

    #[test]
    fn test_terminal_events() {
        assert!(UnifiedStreamEvent::Complete { stop_reason: None }.is_terminal());
        assert!(UnifiedStreamEvent::Error {
            message: "x".into(),
            code: None
        }
        .is_terminal());
        assert!(!UnifiedStreamEvent::delta(CanonicalDelta::text("x")).is_terminal());
    }

    #[test]
    fn test_adapter_error_display() {
        let err = AdapterError::InvalidFormat("bad json".to_string());
        assert_eq!(err.to_string(), "Invalid format: bad json");
        assert!(err.is_recoverable());

        let err = AdapterError::Upstream("overloaded".to_string());
        assert_eq!(err.to_string(), "Upstream error: overloaded");
        assert!(!err.is_recoverable());
    }
}
