//! Claude API Adapter
//!
//! Handles the Anthropic messages SSE format. Extended thinking arrives as
//! `thinking_delta` blocks, answer text as `text_delta`. The stop reason is
//! reported in `message_delta` and the stream ends with `message_stop`.

use serde::Deserialize;

use super::sse_data;
use chat_relay_core::streaming::{
    AdapterError, CanonicalDelta, StreamAdapter, UnifiedStreamEvent,
};

/// Internal event types from Claude API SSE format
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeApiEvent {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Adapter for Claude API SSE format
#[derive(Debug, Default)]
pub struct ClaudeApiAdapter {
    stop_reason: Option<String>,
}

impl ClaudeApiAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamAdapter for ClaudeApiAdapter {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn supports_thinking(&self) -> bool {
        true
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let Some(json_str) = sse_data(input) else {
            return Ok(vec![]);
        };

        let event: ClaudeApiEvent = serde_json::from_str(json_str)
            .map_err(|e| AdapterError::ParseError(e.to_string()))?;

        let events = match event {
            ClaudeApiEvent::MessageStart { message } => match message.usage {
                Some(usage) => vec![UnifiedStreamEvent::Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    thinking_tokens: None,
                }],
                None => vec![],
            },
            ClaudeApiEvent::ContentBlockDelta { delta } => match delta {
                Delta::TextDelta { text } if !text.is_empty() => {
                    vec![UnifiedStreamEvent::delta(CanonicalDelta::text(text))]
                }
                Delta::ThinkingDelta { thinking } if !thinking.is_empty() => {
                    vec![UnifiedStreamEvent::delta(CanonicalDelta::think(thinking))]
                }
                _ => vec![],
            },
            ClaudeApiEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                usage
                    .map(|u| UnifiedStreamEvent::Usage {
                        input_tokens: 0,
                        output_tokens: u.output_tokens,
                        thinking_tokens: None,
                    })
                    .into_iter()
                    .collect()
            }
            ClaudeApiEvent::MessageStop => {
                vec![UnifiedStreamEvent::Complete {
                    stop_reason: self.stop_reason.take(),
                }]
            }
            ClaudeApiEvent::Error { error } => {
                return Err(AdapterError::Upstream(error.message));
            }
            ClaudeApiEvent::Unknown => vec![],
        };

        Ok(events)
    }

    fn reset(&mut self) {
        self.stop_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_delta() {
        let mut adapter = ClaudeApiAdapter::new();

        let events = adapter.adapt(r#"data: {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}}"#).unwrap();
        assert_eq!(
            events,
            vec![UnifiedStreamEvent::delta(CanonicalDelta::text("Hello"))]
        );
    }

    #[test]
    fn test_thinking_delta() {
        let mut adapter = ClaudeApiAdapter::new();

        let events = adapter.adapt(r#"data: {"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "reasoning..."}}"#).unwrap();
        assert_eq!(
            events,
            vec![UnifiedStreamEvent::delta(CanonicalDelta::think("reasoning..."))]
        );
    }

    #[test]
    fn test_single_complete_with_stop_reason() {
        let mut adapter = ClaudeApiAdapter::new();

        let events = adapter
            .adapt(r#"data: {"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 15}}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![UnifiedStreamEvent::Usage {
                input_tokens: 0,
                output_tokens: 15,
                thinking_tokens: None
            }]
        );

        let events = adapter.adapt(r#"data: {"type": "message_stop"}"#).unwrap();
        assert_eq!(
            events,
            vec![UnifiedStreamEvent::Complete {
                stop_reason: Some("end_turn".to_string())
            }]
        );
    }

    #[test]
    fn test_error_event_is_fatal() {
        let mut adapter = ClaudeApiAdapter::new();
        let err = adapter
            .adapt(r#"data: {"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}"#)
            .unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_non_data_lines_skipped() {
        let mut adapter = ClaudeApiAdapter::new();

        assert!(adapter.adapt("").unwrap().is_empty());
        assert!(adapter.adapt("event: ping").unwrap().is_empty());
        assert!(adapter.adapt(r#"data: {"type": "ping"}"#).unwrap().is_empty());
    }
}
