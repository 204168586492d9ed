//! Error types for queue operations.

use crate::message::EventKind;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Transport error ({backend}): {message}")]
    Transport {
        backend: String,
        message: String,
        transient: bool,
    },

    #[error("Connection closed for queue: {queue_name}")]
    ConnectionClosed { queue_name: String },

    #[error("Receive loop already started for queue: {queue_name}")]
    ReceiveAlreadyStarted { queue_name: String },

    #[error("Unsupported event kind: {kind}")]
    UnsupportedEventKind { kind: EventKind },

    #[error("Handler for {kind} messages failed: {message}")]
    Handler { kind: EventKind, message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Blocking send is not supported on a current-thread runtime, use send_async")]
    BlockingUnsupported,

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Build a transport error that is expected to clear up on its own
    pub fn transient(backend: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            backend: backend.to_string(),
            message: message.into(),
            transient: true,
        }
    }

    /// Build a transport error that will not clear up by retrying
    pub fn permanent(backend: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            backend: backend.to_string(),
            message: message.into(),
            transient: false,
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::ConnectionClosed { .. } => false,
            Self::ReceiveAlreadyStarted { .. } => false,
            Self::UnsupportedEventKind { .. } => false,
            Self::Handler { .. } => false,
            Self::InvalidState { .. } => false,
            Self::BlockingUnsupported => false,
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Check if error should be retried
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport {
                transient: true, ..
            } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Backend '{backend}' is not available, enable the '{feature}' feature")]
    BackendDisabled { backend: String, feature: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
