//! OpenAI Chat Completions SSE Stream Adapter
//!
//! Handles the chat-completions chunk format shared by every
//! OpenAI-compatible backend. Reasoning models deliver their reasoning in a
//! side field (`reasoning_content`, or `reasoning` on some gateways), so
//! classification needs no lookahead.
//!
//! The chunk types and [`ChunkStream`] bookkeeping are reused by the DeepSeek
//! and Qwen adapters, which differ only in how they classify `content`.

use serde::Deserialize;

use super::sse_data;
use chat_relay_core::streaming::{
    AdapterError, CanonicalDelta, StreamAdapter, UnifiedStreamEvent,
};

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<ChunkUsage>,
    #[serde(default)]
    pub error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    #[serde(default)]
    pub delta: Option<ChoiceDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ChoiceDelta {
    pub fn reasoning_text(&self) -> Option<&str> {
        self.reasoning_content
            .as_deref()
            .or(self.reasoning.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn content_text(&self) -> Option<&str> {
        self.content.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionDetails {
    #[serde(default)]
    pub reasoning_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkError {
    #[serde(default)]
    pub message: String,
}

/// One decoded SSE line.
pub(crate) enum ChunkLine {
    Skip,
    Done,
    Chunk(ChatChunk),
}

/// Per-stream bookkeeping shared by the chat-completions adapters.
#[derive(Debug, Default)]
pub(crate) struct ChunkStream {
    stop_reason: Option<String>,
}

impl ChunkStream {
    /// Decode a line. Upstream error objects are fatal, anything else that
    /// does not parse is reported as recoverable.
    pub fn parse(&mut self, input: &str) -> Result<ChunkLine, AdapterError> {
        let Some(data) = sse_data(input) else {
            return Ok(ChunkLine::Skip);
        };
        if data == "[DONE]" {
            return Ok(ChunkLine::Done);
        }
        let chunk: ChatChunk = serde_json::from_str(data)
            .map_err(|e| AdapterError::ParseError(format!("{}: {}", e, data)))?;
        if let Some(err) = &chunk.error {
            return Err(AdapterError::Upstream(err.message.clone()));
        }
        if let Some(reason) = chunk.choices.iter().find_map(|c| c.finish_reason.clone()) {
            self.stop_reason = Some(reason);
        }
        Ok(ChunkLine::Chunk(chunk))
    }

    pub fn usage_event(chunk: &ChatChunk) -> Option<UnifiedStreamEvent> {
        chunk.usage.as_ref().map(|u| UnifiedStreamEvent::Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            thinking_tokens: u
                .completion_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens),
        })
    }

    pub fn complete(&mut self) -> UnifiedStreamEvent {
        UnifiedStreamEvent::Complete {
            stop_reason: self.stop_reason.take(),
        }
    }

    pub fn reset(&mut self) {
        self.stop_reason = None;
    }
}

/// Adapter for OpenAI chat-completions streams
pub struct OpenAIAdapter {
    model: String,
    stream: ChunkStream,
}

impl OpenAIAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            stream: ChunkStream::default(),
        }
    }

    /// Check if model supports reasoning (o-series models)
    fn model_supports_reasoning(&self) -> bool {
        let model = self.model.to_lowercase();
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
    }
}

impl StreamAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn supports_thinking(&self) -> bool {
        self.model_supports_reasoning()
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let chunk = match self.stream.parse(input)? {
            ChunkLine::Skip => return Ok(vec![]),
            ChunkLine::Done => return Ok(vec![self.stream.complete()]),
            ChunkLine::Chunk(chunk) => chunk,
        };

        let mut events = Vec::new();
        for delta in chunk.choices.iter().filter_map(|c| c.delta.as_ref()) {
            if let Some(reasoning) = delta.reasoning_text() {
                events.push(UnifiedStreamEvent::delta(CanonicalDelta::think(reasoning)));
            }
            if let Some(content) = delta.content_text() {
                events.push(UnifiedStreamEvent::delta(CanonicalDelta::text(content)));
            }
        }
        events.extend(ChunkStream::usage_event(&chunk));
        Ok(events)
    }

    fn reset(&mut self) {
        self.stream.reset();
    }
}
