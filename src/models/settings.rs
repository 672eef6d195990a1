//! Settings Models
//!
//! Server configuration loaded from a TOML file.

use std::collections::HashSet;
use std::net::SocketAddr;

use chat_relay_core::ProxyConfig;
use chat_relay_llm::{BackendDescriptor, BackendSpec, ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub backends: Vec<BackendConfig>,
    pub moderation: ModerationConfig,
    pub auth: AuthConfig,
    pub asr: AsrConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. "127.0.0.1:8080"
    pub bind: String,
    /// Capacity of the pipeline → transport event queue
    pub channel_capacity: usize,
    /// SSE keep-alive interval in seconds
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            channel_capacity: 4,
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; in-memory when unset
    pub path: Option<String>,
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One logical model exposed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Model id clients select
    pub model_id: String,
    pub provider: ProviderKind,
    /// Upstream model name
    pub model: String,
    #[serde(default)]
    pub bot_id: String,
    #[serde(default)]
    pub bot_name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

impl BackendConfig {
    /// Inline key first, then the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty())
        })
    }

    pub fn to_spec(&self) -> BackendSpec {
        let defaults = ProviderConfig::default();
        let bot_id = if self.bot_id.is_empty() {
            self.model_id.clone()
        } else {
            self.bot_id.clone()
        };
        let bot_name = if self.bot_name.is_empty() {
            self.model_id.clone()
        } else {
            self.bot_name.clone()
        };
        BackendSpec {
            descriptor: BackendDescriptor {
                model_id: self.model_id.clone(),
                bot_id,
                bot_name,
            },
            provider: ProviderConfig {
                provider: self.provider,
                api_key: self.resolve_api_key(),
                base_url: self.base_url.clone(),
                model: self.model.clone(),
                max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
                temperature: self.temperature.unwrap_or(defaults.temperature),
                timeout_secs: self.timeout_secs,
                proxy: self.proxy.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub banned_terms: Vec<String>,
    /// Output is checked every this many chat deltas
    pub check_every: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            banned_terms: Vec::new(),
            check_every: 8,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<TokenEntry>,
    pub suspended: Vec<Suspension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suspension {
    pub user_id: String,
    /// Unix seconds
    pub expires_at: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Downstream recognizer WebSocket URL; the relay is disabled when unset
    pub url: Option<String>,
    /// Text frame sent after connecting
    pub init_payload: String,
    /// Text frame sent on end of utterance
    pub stop_payload: String,
    /// Deadline for control-frame writes and socket closes
    pub write_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Boolean field marking the last recognizer result
    pub final_field: String,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            url: None,
            init_payload: r#"{"type":"start","format":"pcm","sampleRate":16000}"#.to_string(),
            stop_payload: r#"{"type":"stop"}"#.to_string(),
            write_timeout_ms: 2_000,
            connect_timeout_ms: 5_000,
            final_field: "final".to_string(),
        }
    }
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid bind address '{}': {}", self.server.bind, e))?;

        if self.server.channel_capacity == 0 {
            return Err("server.channel_capacity must be at least 1".to_string());
        }

        if self.storage.pool_size == 0 {
            return Err("storage.pool_size must be at least 1".to_string());
        }

        if self.moderation.check_every == 0 {
            return Err("moderation.check_every must be at least 1".to_string());
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.model_id.trim().is_empty() {
                return Err("backend model_id must not be empty".to_string());
            }
            if backend.model.trim().is_empty() {
                return Err(format!("backend '{}' has no upstream model", backend.model_id));
            }
            if !seen.insert(backend.model_id.as_str()) {
                return Err(format!("Duplicate backend model_id: {}", backend.model_id));
            }
        }

        if self.asr.write_timeout_ms == 0 {
            return Err("asr.write_timeout_ms must be at least 1".to_string());
        }
        if self.asr.final_field.is_empty() {
            return Err("asr.final_field must not be empty".to_string());
        }

        Ok(())
    }

    pub fn backend_specs(&self) -> Vec<BackendSpec> {
        self.backends.iter().map(BackendConfig::to_spec).collect()
    }
}
