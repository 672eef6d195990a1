//! Chat Backend Trait
//!
//! Defines the common interface for all model backends.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message};
use chat_relay_core::pipe::PipeReceiver;
use chat_relay_core::streaming::UnifiedStreamEvent;

/// Capacity of the pipe between a backend producer and its consumer.
pub const DELTA_PIPE_CAPACITY: usize = 5;

/// Receiving end of a backend's delta stream.
pub type DeltaSource = PipeReceiver<UnifiedStreamEvent>;

/// Trait that all model backends must implement.
///
/// Implementations are shared across requests and must not keep per-request
/// state on `self`; per-stream state lives in the producer task.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns the backend name for identification.
    fn name(&self) -> &'static str;

    /// Returns the upstream model being used.
    fn model(&self) -> &str;

    /// Returns whether this backend can emit `Think` deltas.
    fn supports_thinking(&self) -> bool;

    /// Start a streaming completion.
    ///
    /// Errors before the upstream accepted the request are returned directly.
    /// After that the producer runs on its own task and reports everything,
    /// including failures, through the returned pipe, ending with exactly one
    /// terminal event. Cancelling `cancel` stops the producer; dropping the
    /// receiver does too.
    async fn stream(
        &self,
        messages: Vec<Message>,
        options: LlmRequestOptions,
        cancel: CancellationToken,
    ) -> LlmResult<DeltaSource>;

    /// Run a completion to the end and return the classified result.
    async fn generate(
        &self,
        messages: Vec<Message>,
        options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Helper function to parse HTTP error status codes
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ServerError {
            message: format!("{}: endpoint or model not found: {}", provider, body),
            status: Some(status),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
