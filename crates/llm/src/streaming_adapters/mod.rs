//! Provider-Specific Stream Adapters
//!
//! Each adapter handles the unique streaming format of its provider and
//! classifies content into canonical deltas.

pub mod claude_api;
pub mod deepseek;
pub mod fence;
pub mod openai;
pub mod qwen;
pub mod tags;

pub use claude_api::ClaudeApiAdapter;
pub use deepseek::DeepSeekAdapter;
pub use fence::FenceSniffer;
pub use openai::OpenAIAdapter;
pub use qwen::QwenAdapter;
pub use tags::TagSniffer;

use crate::types::ProviderKind;
use chat_relay_core::streaming::StreamAdapter;

/// Payload of an SSE `data:` line, or `None` for blank, comment, `event:`,
/// `id:` and `retry:` lines.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let data = trimmed.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

/// Factory for creating the adapter matching a backend's protocol.
pub struct AdapterFactory;

impl AdapterFactory {
    pub fn create(kind: ProviderKind, model: &str) -> Box<dyn StreamAdapter> {
        match kind {
            ProviderKind::OpenAI => Box::new(OpenAIAdapter::new(model)),
            ProviderKind::DeepSeek => Box::new(DeepSeekAdapter::new()),
            ProviderKind::Qwen => Box::new(QwenAdapter::new(model)),
            ProviderKind::Anthropic => Box::new(ClaudeApiAdapter::new()),
        }
    }
}
