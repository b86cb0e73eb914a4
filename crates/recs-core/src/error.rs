//! Error types for the recommendation client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the whole client.
///
/// Transport and server failures are classified into a small fixed set so the
/// workflow can surface exactly one human-readable message per failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecsError {
    /// No response was received (DNS, refused connection, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The request deadline was exceeded.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The server rejected the call because of its own rate limit.
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// The server rejected the input. The message is surfaced verbatim.
    #[error("{0}")]
    Validation(String),

    /// The server failed, either with an HTTP status or an in-stream error event.
    #[error("Server error: {message}")]
    Server { status: Option<u16>, message: String },

    /// The stream closed before a terminal event was received.
    #[error("Stream transport error: {0}")]
    StreamTransport(String),

    /// A stream message could not be decoded. Never retried.
    #[error("Malformed stream message: {0}")]
    Parse(String),

    /// The client-side daily ceiling was reached before any network call.
    #[error("Daily limit of {ceiling} generations reached")]
    QuotaExceeded { ceiling: u32 },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecsError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a Server error for an in-stream `error` event (no HTTP status).
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            status: None,
            message: message.into(),
        }
    }

    pub fn stream_transport(message: impl Into<String>) -> Self {
        Self::StreamTransport(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether the streaming path may reconnect after this error.
    ///
    /// Only transient transport and server-side conditions qualify. Parse
    /// failures, rejected input and the client-side quota are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::StreamTransport(_) => true,
            Self::RateLimit { .. } => true,
            Self::Server { status, .. } => status.is_some(),
            _ => false,
        }
    }

    /// The single message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Self::Timeout(_) => {
                "The request timed out. Generation can take up to two minutes, please try again."
                    .to_string()
            }
            Self::RateLimit { .. } => {
                "Too many requests right now. Please wait a moment and try again.".to_string()
            }
            Self::Validation(message) => message.clone(),
            Self::Server {
                status: Some(_), ..
            } => "The server encountered an error. Please try again later.".to_string(),
            Self::Server {
                status: None,
                message,
            } => message.clone(),
            Self::StreamTransport(message) => message.clone(),
            Self::Parse(_) => "Received an unreadable response from the server.".to_string(),
            Self::QuotaExceeded { ceiling } => format!(
                "You have used all {ceiling} free generations for today. Sign in or come back tomorrow."
            ),
            other => other.to_string(),
        }
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for RecsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for RecsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for RecsError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for RecsError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, RecsError>`.
pub type Result<T> = std::result::Result<T, RecsError>;
