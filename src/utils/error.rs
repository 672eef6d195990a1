//! Error Handling
//!
//! Unified error type for the application crate. Pipeline-level failures
//! arrive as [`RelayError`]; storage, I/O and configuration failures get
//! their own variants. Every variant renders as a structured JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_relay_core::RelayError;
use chat_relay_llm::LlmError;
use serde_json::json;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Pipeline errors (edit misuse, unknown model, sensitive input, ...)
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite errors (auto-converted from rusqlite::Error)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status for the structured error response.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Relay(err) => match err {
                RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                RelayError::Forbidden { .. } => StatusCode::FORBIDDEN,
                RelayError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
                RelayError::InvalidReference(_) => StatusCode::BAD_REQUEST,
                RelayError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
                RelayError::SensitiveContent(_) => StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
                RelayError::Serialization(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Relay(err) => err.code(),
            AppError::Database(_) | AppError::Sqlite(_) => "database_error",
            AppError::Config(_) | AppError::Toml(_) => "config_error",
            AppError::Io(_) => "io_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        AppError::Relay(err.into())
    }
}

/// Storage failures surface to the pipeline as persistence errors.
impl From<AppError> for RelayError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Relay(inner) => inner,
            AppError::Validation(msg) => RelayError::invalid_reference(msg),
            AppError::NotFound(msg) => RelayError::invalid_reference(msg),
            other => RelayError::persistence(other.to_string()),
        }
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let AppError::Relay(RelayError::Forbidden { expires_at, .. }) = &self {
            error["expiresAt"] = json!(expires_at);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::database("connection failed");
        assert_eq!(err.to_string(), "Database error: connection failed");
    }

    #[test]
    fn test_error_conversion() {
        let err = AppError::config("invalid setting");
        let msg: String = err.into();
        assert!(msg.contains("Configuration error"));
    }

    #[test]
    fn test_relay_status_mapping() {
        let cases = [
            (RelayError::unauthorized("no token"), StatusCode::UNAUTHORIZED),
            (RelayError::precondition("empty"), StatusCode::PRECONDITION_FAILED),
            (RelayError::invalid_reference("x"), StatusCode::BAD_REQUEST),
            (RelayError::backend("down"), StatusCode::BAD_GATEWAY),
            (
                RelayError::sensitive("hit"),
                StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
            ),
            (
                RelayError::Forbidden {
                    message: "suspended".into(),
                    expires_at: 10,
                },
                StatusCode::FORBIDDEN,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_storage_error_becomes_persistence_failure() {
        let relay: RelayError = AppError::database("disk full").into();
        assert_eq!(relay.code(), "persistence_failed");

        let relay: RelayError = AppError::Relay(RelayError::Interrupted).into();
        assert_eq!(relay, RelayError::Interrupted);
    }

    #[test]
    fn test_unknown_model_is_bad_request() {
        let err: AppError = LlmError::ModelNotFound {
            model: "nope".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_reference");
    }

    #[tokio::test]
    async fn test_forbidden_body_carries_expiry() {
        let response = AppError::from(RelayError::Forbidden {
            message: "suspended".into(),
            expires_at: 1_700_000_000,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "forbidden");
        assert_eq!(body["error"]["expiresAt"], 1_700_000_000);
    }
}
