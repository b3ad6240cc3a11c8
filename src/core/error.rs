//! Error type system for the Rulia plugin bridge
//!
//! Errors fall into four groups:
//! - Protocol misuse by a plugin (double termination, calls after the end)
//! - Transport failures surfaced by the HTTP bridge
//! - Plugin-declared failures raised through `end_with_exception`
//! - Host-side failures (configuration, storage, I/O)

use serde::Serialize;

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // Plugin protocol errors
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Plugin raised an exception: {0}")]
    PluginException(String),

    // HTTP bridge errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    // Host-side errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl BridgeError {
    /// Get the error type name used in diagnostics
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::ProtocolViolation(_) => "ProtocolViolation",
            BridgeError::PluginException(_) => "PluginException",
            BridgeError::InvalidRequest(_) => "InvalidRequest",
            BridgeError::Timeout(_) => "Timeout",
            BridgeError::NetworkError(_) => "NetworkError",
            BridgeError::ConfigError(_) => "ConfigError",
            BridgeError::StorageError(_) => "StorageError",
            BridgeError::IoError(_) => "IoError",
            BridgeError::SerializationError(_) => "SerializationError",
            BridgeError::ValidationError(_) => "ValidationError",
        }
    }

    /// Check if this error is retryable
    ///
    /// The bridge itself never retries; this is a hint for plugins and hosts.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::NetworkError(_) | BridgeError::Timeout(_))
    }

    /// Whether the error was caused by the plugin misusing the bridge
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, BridgeError::ProtocolViolation(_))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Timeout(err.to_string())
        } else if err.is_builder() {
            BridgeError::InvalidRequest(err.to_string())
        } else {
            BridgeError::NetworkError(err.to_string())
        }
    }
}

/// Developer-facing report of a rejected bridge call
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Invocation the rejected call belonged to
    pub invocation_id: String,
}

impl Diagnostic {
    pub fn from_error(error: &BridgeError, invocation_id: impl Into<String>) -> Self {
        Self {
            error: error.error_type().to_string(),
            message: error.to_string(),
            invocation_id: invocation_id.into(),
        }
    }
}

/// Result type alias for operations that can fail with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error, classifying it as a storage failure
    fn storage_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn storage_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| BridgeError::StorageError(format!("{}: {}", context.into(), e)))
    }
}
