//! Response Types
//!
//! Bodies returned by the plain JSON endpoints.

use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
    pub database: bool,
    /// Number of configured model backends
    pub backends: usize,
    pub speech_recognition: bool,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            service: "chat-relay".to_string(),
            database: false,
            backends: 0,
            speech_recognition: false,
        }
    }
}

impl HealthResponse {
    /// Fill in the probes and derive the overall status.
    pub fn probe(database: bool, backends: usize, speech_recognition: bool) -> Self {
        let status = if database && backends > 0 {
            "healthy"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            database,
            backends,
            speech_recognition,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_fields() {
        let health = HealthResponse::default();
        assert_eq!(health.service, "chat-relay");
    }

    #[test]
    fn test_degraded_without_backends() {
        assert_eq!(HealthResponse::probe(true, 0, false).status, "degraded");
        assert_eq!(HealthResponse::probe(true, 2, false).status, "healthy");
    }
}
