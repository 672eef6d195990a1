//! Chat Relay LLM
//!
//! Model backends behind a uniform streaming contract:
//! - [`ChatBackend`] trait and request/response types
//! - OpenAI-compatible backend (OpenAI, DeepSeek, Qwen)
//! - Anthropic backend
//! - per-provider content classifiers in [`streaming_adapters`]
//! - the Model Dispatch Registry used by the pipeline
//!
//! Also includes the proxy-aware HTTP client factory.

pub mod anthropic;
pub mod http_client;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod sse;
pub mod streaming_adapters;
pub mod types;

// Re-export main types
pub use anthropic::AnthropicBackend;
pub use http_client::build_http_client;
pub use openai::OpenAICompatibleBackend;
pub use provider::{ChatBackend, DeltaSource, DELTA_PIPE_CAPACITY};
pub use registry::{
    BackendDescriptor, BackendRegistry, BackendRegistryBuilder, BackendSpec, ResolvedBackend,
};
pub use types::*;

// Re-export streaming adapters
pub use streaming_adapters::{
    AdapterFactory, ClaudeApiAdapter, DeepSeekAdapter, FenceSniffer, OpenAIAdapter, QwenAdapter,
    TagSniffer,
};
