//! DeepSeek SSE Stream Adapter
//!
//! DeepSeek-style backends stream reasoning and suggestions inline in
//! `content`, wrapped in `<think>` / `<suggest>` tags that are usually split
//! across several tokens. Content goes through a [`TagSniffer`]; a
//! `reasoning_content` side field, when present, is classified directly.

use super::openai::{ChunkLine, ChunkStream};
use super::tags::TagSniffer;
use chat_relay_core::streaming::{
    AdapterError, CanonicalDelta, StreamAdapter, UnifiedStreamEvent,
};

/// Adapter for tag-marked chat-completions streams
pub struct DeepSeekAdapter {
    stream: ChunkStream,
    sniffer: TagSniffer,
}

impl DeepSeekAdapter {
    pub fn new() -> Self {
        Self {
            stream: ChunkStream::default(),
            sniffer: TagSniffer::new(),
        }
    }

    fn wrap(deltas: Vec<CanonicalDelta>) -> impl Iterator<Item = UnifiedStreamEvent> {
        deltas.into_iter().map(UnifiedStreamEvent::delta)
    }
}

impl Default for DeepSeekAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for DeepSeekAdapter {
    fn provider_name(&self) -> &'static str {
        "deepseek"
    }

    fn supports_thinking(&self) -> bool {
        true
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
                events.extend(Self::wrap(self.sniffer.push(content)));
            }
        }
        events.extend(ChunkStream::usage_event(&chunk));
        Ok(events)
    }

    fn finish(&mut self) -> Vec<UnifiedStreamEvent> {
        Self::wrap(self.sniffer.finish()).collect()
    }

    fn reset(&mut self) {
        self.stream.reset();
        self.sniffer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_line(content: &str) -> String {
        format!(
            r#"data: {{"choices":[{{"delta":{{"content":{}}}}}]}}"#,
            serde_json::to_string(content).unwrap()
        )
    }

    #[test]
    fn test_split_think_tags_across_chunks() {
        let mut adapter = DeepSeekAdapter::new();
        let mut events = Vec::new();
        for token in ["<", "think", ">", "hello", "</", "think", ">", "world"] {
            events.extend(adapter.adapt(&content_line(token)).unwrap());
        }
        assert_eq!(
            events,
            vec![
                UnifiedStreamEvent::delta(CanonicalDelta::think("hello")),
                UnifiedStreamEvent::delta(CanonicalDelta::text("world")),
            ]
        );
    }

    #[test]
    fn test_done_flushes_withheld_content_before_complete() {
        let mut adapter = DeepSeekAdapter::new();
        assert!(adapter.adapt(&content_line("<")).unwrap().is_empty());
        let events = adapter.adapt("data: [DONE]").unwrap();
        assert_eq!(
            events,
            vec![
                UnifiedStreamEvent::delta(CanonicalDelta::text("<")),
                UnifiedStreamEvent::Complete { stop_reason: None },
            ]
        );
    }

    #[test]
    fn test_reasoning_field_is_think() {
        let mut adapter = DeepSeekAdapter::new();
        let events = adapter
            .adapt(r#"data: {"choices":[{"delta":{"reasoning_content":"step 1"}}]}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![UnifiedStreamEvent::delta(CanonicalDelta::think("step 1"))]
        );
    }
}
