//! OpenAI-Compatible Backend
//!
//! Implementation of [`ChatBackend`] for the chat-completions protocol spoken
//! by OpenAI, DeepSeek and DashScope (Qwen compatible mode). The provider kind
//! only selects the default endpoint and the content classifier.

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
use crate::streaming_adapters::{tags::split_inline_tags, AdapterFactory, FenceSniffer};
use chat_relay_core::pipe::pipe;
use chat_relay_core::streaming::CanonicalDelta;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";
const QWEN_API_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";

/// Non-streaming response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Chat-completions backend
pub struct OpenAICompatibleBackend {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAICompatibleBackend {
    /// Create a backend for an OpenAI, DeepSeek or Qwen provider config.
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        if config.provider == ProviderKind::Anthropic {
            return Err(LlmError::InvalidRequest {
                message: "anthropic providers use AnthropicBackend".to_string(),
            });
        }
        let client = build_http_client(config.proxy.as_ref(), None)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        if let Some(url) = self.config.base_url.as_deref() {
            return url;
        }
        match self.config.provider {
            ProviderKind::DeepSeek => DEEPSEEK_API_URL,
            ProviderKind::Qwen => QWEN_API_URL,
            _ => OPENAI_API_URL,
        }
    }

    /// o-series models reject a temperature parameter
    fn accepts_temperature(&self) -> bool {
        let model = self.config.model.to_lowercase();
        !(model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4"))
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        stream: bool,
        options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let wire_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    MessageRole::Tool => "user",
                    other => other.as_str(),
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": wire_messages,
            "max_tokens": options.max_tokens_override.unwrap_or(self.config.max_tokens),
            "stream": stream,
        });

        if self.accepts_temperature() {
            body["temperature"] = serde_json::json!(options
                .temperature_override
                .unwrap_or(self.config.temperature));
        }
        if let Some(user) = &options.user_id {
            body["user"] = serde_json::json!(user);
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, body: &serde_json::Value, stream: bool) -> LlmResult<reqwest::Response> {
        let provider = self.name();
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error(provider))?;

        let mut request = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
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
            return Err(parse_http_error(status, &body_text, provider));
        }
        Ok(response)
    }

    /// Classify a complete `content` string the same way the stream would be.
    fn classify_content(&self, content: &str) -> Vec<CanonicalDelta> {
        match self.config.provider {
            ProviderKind::DeepSeek => split_inline_tags(content),
            ProviderKind::Qwen => {
                let mut fences = FenceSniffer::new();
                let mut deltas = fences.push(content);
                deltas.extend(fences.finish());
                deltas
            }
            _ => vec![CanonicalDelta::text(content)],
        }
    }

    fn parse_response(&self, response: ChatResponse) -> LlmResponse {
        let mut deltas = Vec::new();
        let mut stop_reason = StopReason::EndTurn;

        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(reasoning) = choice.message.reasoning_content.filter(|s| !s.is_empty()) {
                deltas.push(CanonicalDelta::think(reasoning));
            }
            if let Some(content) = choice.message.content.filter(|s| !s.is_empty()) {
                deltas.extend(self.classify_content(&content));
            }
            if let Some(reason) = choice.finish_reason {
                stop_reason = StopReason::from(reason.as_str());
            }
        }

        LlmResponse {
            deltas,
            stop_reason,
            usage: response.usage.map(|u| UsageStats {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                thinking_tokens: None,
            }),
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAICompatibleBackend {
    fn name(&self) -> &'static str {
        match self.config.provider {
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Qwen => "qwen",
            _ => "openai",
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_thinking(&self) -> bool {
        AdapterFactory::create(self.config.provider, &self.config.model).supports_thinking()
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
        debug!(
            "[{}] stream opened for model {}",
            self.name(),
            self.config.model
        );

        let (tx, rx) = pipe(DELTA_PIPE_CAPACITY);
        let adapter = AdapterFactory::create(self.config.provider, &self.config.model);
        tokio::spawn(pump_sse(
            Box::pin(response.bytes_stream()),
            adapter,
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
        let parsed: ChatResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;
        Ok(self.parse_response(parsed))
    }
}
