//! HTTP Client Factory
//!
//! Builds reqwest clients for backends, with optional proxy support.

use std::time::Duration;

use chat_relay_core::proxy::ProxyConfig;

use crate::types::{LlmError, LlmResult};

/// Build a `reqwest::Client` with the resolved proxy configuration.
///
/// - `Some(proxy)` -> configure proxy on the client
/// - `None` -> explicitly disable proxy (`no_proxy`), ignoring env vars
///
/// `timeout` bounds the whole request including the streamed body, so
/// streaming backends normally pass `None`.
pub fn build_http_client(
    proxy: Option<&ProxyConfig>,
    timeout: Option<Duration>,
) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
    match proxy {
        Some(cfg) => {
            let url = cfg.url();
            let mut p = reqwest::Proxy::all(&url).map_err(|e| LlmError::InvalidRequest {
                message: format!("invalid proxy url {}: {}", url, e),
            })?;
            if let (Some(u), Some(pw)) = (&cfg.username, &cfg.password) {
                p = p.basic_auth(u, pw);
            }
            builder = builder.proxy(p);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| LlmError::Other {
        message: format!("failed to build http client: {}", e),
    })
}
