//! Token Verification
//!
//! Bearer tokens map to user identities. Suspended users are rejected with
//! the suspension expiry so clients can tell them when to come back.

use std::collections::HashMap;

use async_trait::async_trait;
use chat_relay_core::{RelayError, RelayResult};
use tracing::debug;

use crate::models::settings::AuthConfig;

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> RelayResult<Identity>;
}

#[derive(Debug, Clone)]
struct Suspension {
    expires_at: i64,
    reason: String,
}

/// Verifier backed by the `[auth]` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
    suspended: HashMap<String, Suspension>,
}

impl StaticTokenVerifier {
    pub fn from_config(config: &AuthConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|t| (t.token.clone(), t.user_id.clone()))
            .collect();
        let suspended = config
            .suspended
            .iter()
            .map(|s| {
                (
                    s.user_id.clone(),
                    Suspension {
                        expires_at: s.expires_at,
                        reason: s.reason.clone(),
                    },
                )
            })
            .collect();
        Self { tokens, suspended }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn with_suspension(mut self, user_id: impl Into<String>, expires_at: i64) -> Self {
        self.suspended.insert(
            user_id.into(),
            Suspension {
                expires_at,
                reason: String::new(),
            },
        );
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> RelayResult<Identity> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(RelayError::unauthorized("missing token"));
        }
        let user_id = self
            .tokens
            .get(token)
            .ok_or_else(|| RelayError::unauthorized("invalid token"))?;

        if let Some(suspension) = self.suspended.get(user_id) {
            if suspension.expires_at > chrono::Utc::now().timestamp() {
                let message = if suspension.reason.is_empty() {
                    "account suspended".to_string()
                } else {
                    format!("account suspended: {}", suspension.reason)
                };
                return Err(RelayError::Forbidden {
                    message,
                    expires_at: suspension.expires_at,
                });
            }
        }

        debug!(user_id = %user_id, "[Auth] token verified");
        Ok(Identity {
            user_id: user_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::default()
            .with_token("good", "alice")
            .with_token("banned", "mallory")
            .with_token("paroled", "bob")
            .with_suspension("mallory", chrono::Utc::now().timestamp() + 3600)
            .with_suspension("bob", 1)
    }

    #[tokio::test]
    async fn test_valid_token() {
        let identity = verifier().verify("Bearer good").await.unwrap();
        assert_eq!(identity.user_id, "alice");
    }

    #[tokio::test]
    async fn test_unknown_and_missing_token() {
        assert!(matches!(
            verifier().verify("nope").await,
            Err(RelayError::Unauthorized(_))
        ));
        assert!(matches!(
            verifier().verify("  ").await,
            Err(RelayError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_suspension_until_expiry() {
        let err = verifier().verify("banned").await.unwrap_err();
        assert!(matches!(err, RelayError::Forbidden { expires_at, .. } if expires_at > 1));

        let identity = verifier().verify("paroled").await.unwrap();
        assert_eq!(identity.user_id, "bob");
    }
}
