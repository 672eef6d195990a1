//! Qwen (DashScope compatible mode) SSE Stream Adapter
//!
//! DashScope uses the chat-completions format with a `reasoning_content`
//! field for Qwen3/QwQ models. The text channel is additionally split into
//! prose and fenced code blocks by a [`FenceSniffer`].

use super::fence::FenceSniffer;
use super::openai::{ChunkLine, ChunkStream};
use chat_relay_core::streaming::{
    AdapterError, CanonicalDelta, StreamAdapter, UnifiedStreamEvent,
};

/// Adapter for Qwen (DashScope) streams
pub struct QwenAdapter {
    model: String,
    stream: ChunkStream,
    fences: FenceSniffer,
}

impl QwenAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            stream: ChunkStream::default(),
            fences: FenceSniffer::new(),
        }
    }

    /// Check if model supports reasoning (Qwen3 series, QwQ models)
    fn model_supports_reasoning(&self) -> bool {
        let model_lower = self.model.to_lowercase();
        model_lower.contains("qwen3")
            || model_lower.contains("qwq")
            || model_lower.contains("thinking")
    }
}

impl StreamAdapter for QwenAdapter {
    fn provider_name(&self) -> &'static str {
        "qwen"
    }

    fn supports_thinking(&self) -> bool {
        self.model_supports_reasoning()
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let chunk = match self.stream.parse(input)? {
            ChunkLine::Skip => return Ok(vec![]),
            ChunkLine::Done => {
                let mut events = self.finish();
                events.push(self.stream.complete());
                return Ok(events);
            }
            ChunkLine::Chunk(chunk) => chunk,
        };

        let mut events = Vec::new();
        for delta in chunk.choices.iter().filter_map(|c| c.delta.as_ref()) {
            if let Some(reasoning) = delta.reasoning_text() {
                events.push(UnifiedStreamEvent::delta(CanonicalDelta::think(reasoning)));
            }
            if let Some(content) = delta.content_text() {
                events.extend(
                    self.fences
                        .push(content)
                        .into_iter()
                        .map(UnifiedStreamEvent::delta),
                );
            }
        }
        events.extend(ChunkStream::usage_event(&chunk));
        Ok(events)
    }

    fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        self.fences
            .finish()
            .into_iter()
            .map(UnifiedStreamEvent::delta)
            .collect()
    }

    fn reset(&mut self) {
        self.stream.reset();
        self.fences.reset();
    }
}
