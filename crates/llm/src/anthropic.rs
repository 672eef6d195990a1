//! Anthropic Backend
//!
//! Implementation of [`ChatBackend`] for the Anthropic messages API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::provider::{
    missing_api_key_error, parse_http_error, ChatBackend, DeltaSource, DELTA_PIPE_CAPACITY,
};
use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageRole, ProviderConfig,
    ProviderKind, StopReason, UsageStats,
};
use crate::http_client::build_http_client;
use crate::sse::pump_sse;
use crate::streaming_adapters::ClaudeApiAdapter;
use chat_relay_core::pipe::pipe;
use chat_relay_core::streaming::CanonicalDelta;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Anthropic messages backend
pub struct AnthropicBackend {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        if config.provider != ProviderKind::Anthropic {
            return Err(LlmError::InvalidRequest {
                message: format!("{} providers use OpenAICompatibleBackend", config.provider),
            });
        }
        let client = build_http_client(config.proxy.as_ref(), None)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL)
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        stream: bool,
        options: &LlmRequestOptions,
    ) -> serde_json::Value {
        // System prompts go in a top-level field, not in the message list.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| {
                let role = match m.role {
                    MessageRole::Assistant => "assistant",
                    _ => "user",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": options.max_tokens_override.unwrap_or(self.config.max_tokens),
            "temperature": options.temperature_override.unwrap_or(self.config.temperature),
            "messages": wire_messages,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        if let Some(user) = &options.user_id {
            body["metadata"] = serde_json::json!({ "user_id": user });
        }
        body
    }

    async fn send(&self, body: &serde_json::Value, stream: bool) -> LlmResult<reqwest::Response> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error("anthropic"))?;

        let mut request = self
            .client
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body);
        if !stream {
            if let Some(secs) = self.config.timeout_secs {
                request = request.timeout(Duration::from_secs(secs));
            }
        }

        let response = request.send().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;
            return Err(parse_http_error(status, &body_text, "anthropic"));
        }
        Ok(response)
    }

    fn parse_response(&self, response: MessagesResponse) -> LlmResponse {
        let deltas = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.is_empty() => Some(CanonicalDelta::text(text)),
                ContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                    Some(CanonicalDelta::think(thinking))
                }
                _ => None,
            })
            .collect();

        LlmResponse {
            deltas,
            stop_reason: response
                .stop_reason
                .as_deref()
                .map(StopReason::from)
                .unwrap_or(StopReason::EndTurn),
            usage: response.usage.map(|u| UsageStats {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                thinking_tokens: None,
            }),
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
        }
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        options: LlmRequestOptions,
        cancel: CancellationToken,
    ) -> LlmResult<DeltaSource> {
        let body = self.build_request_body(&messages, true, &options);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            response = self.send(&body, true) => response?,
        };
        debug!("[anthropic] stream opened for model {}", self.config.model);

        let (tx, rx) = pipe(DELTA_PIPE_CAPACITY);
        tokio::spawn(pump_sse(
            Box::pin(response.bytes_stream()),
            Box::new(ClaudeApiAdapter::new()),
            tx,
            cancel,
        ));
        Ok(rx)
    }

    async fn generate(
        &self,
        messages: Vec<Message>,
        options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(&messages, false, &options);
        let response = self.send(&body, false).await?;
        let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;
        let parsed: MessagesResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;
        Ok(self.parse_response(parsed))
    }
}
