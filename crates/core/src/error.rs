//! Relay Error Types
//!
//! The error taxonomy shared by the backend crate and the application crate.
//! Every variant maps to a stable wire code (see [`RelayError::code`]) that is
//! sent to clients in terminal `error` events and structured error bodies.

use thiserror::Error;

/// Error kinds produced anywhere along the completion pipeline or the audio relay.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request is well-formed but not acceptable in the current state
    /// (edit mode misuse, empty history, audio frame out of order, ...)
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// A malformed or unknown identifier
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// The model backend could not be reached or failed mid-call
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Account suspended until `expires_at` (unix seconds)
    #[error("Forbidden until {expires_at}: {message}")]
    Forbidden { message: String, expires_at: i64 },

    /// Input or output matched the banned-term list
    #[error("Sensitive content: {0}")]
    SensitiveContent(String),

    /// The client went away mid-stream. A soft terminal, not a failure.
    #[error("Interrupted by client")]
    Interrupted,

    /// A storage write failed after the response was already delivered
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relay errors
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Create an unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// Create an invalid reference error
    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    /// Create a backend unavailable error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a sensitive content error
    pub fn sensitive(msg: impl Into<String>) -> Self {
        Self::SensitiveContent(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceFailed(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Unauthorized(_) => "unauthorized",
            RelayError::PreconditionFailed(_) => "precondition_failed",
            RelayError::InvalidReference(_) => "invalid_reference",
            RelayError::BackendUnavailable(_) => "backend_unavailable",
            RelayError::Forbidden { .. } => "forbidden",
            RelayError::SensitiveContent(_) => "sensitive_content",
            RelayError::Interrupted => "interrupted",
            RelayError::PersistenceFailed(_) => "persistence_failed",
            RelayError::Config(_) => "config_error",
            RelayError::Serialization(_) => "serialization_error",
            RelayError::Internal(_) => "internal_error",
        }
    }

    /// Interruption ends a stream without counting as a failure.
    pub fn is_soft_terminal(&self) -> bool {
        matches!(self, RelayError::Interrupted)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convert RelayError to a string
impl From<RelayError> for String {
    fn from(err: RelayError) -> String {
        err.to_string()
    }
}
