//! Proxy Configuration Types
//!
//! Outbound proxy settings for backend HTTP clients. The client factory that
//! consumes them lives in the `chat-relay-llm` crate.

use serde::{Deserialize, Serialize};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    /// URL scheme for this protocol.
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

/// Proxy used by one backend's HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Never written back out.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL without credentials; credentials are applied separately.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}
