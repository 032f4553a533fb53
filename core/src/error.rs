//! Structured error types for the assistant core
//!
//! Only configuration, I/O and model transport failures are errors. Everything
//! that happens inside the execution loop (bad model output, rejected commands,
//! timeouts, spawn failures) is folded into the loop report instead.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for core operations
#[derive(Error, Debug)]
pub enum ClaError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Configuration sources could not be read or merged
    #[error("configuration error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    // =========================================================================
    // Model Endpoint Errors
    // =========================================================================
    /// Model endpoint failure
    #[error("could not reach model: {0}")]
    Model(#[from] ModelError),

    // =========================================================================
    // External Error Wrappers (transparent)
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClaError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ClaError::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Failures of the model transport.
///
/// Every variant is fatal for the current loop and maps to the
/// `endpoint_error` terminal state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Network/connection error
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Request exceeded the configured request timeout
    #[error("request timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Endpoint answered with a non-success status
    #[error("endpoint returned {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body did not follow the wire protocol
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Request was abandoned by the caller
    #[error("request cancelled")]
    Cancelled,
}

impl ModelError {
    pub fn protocol(message: impl Into<String>) -> Self {
        ModelError::Protocol {
            message: message.into(),
        }
    }

    /// Whether the endpoint most likely rejected the declared response schema.
    pub fn is_schema_rejection(&self) -> bool {
        match self {
            ModelError::Http { status, message } => {
                (400..500).contains(status)
                    && *status != 401
                    && *status != 403
                    && *status != 404
                    && (message.to_lowercase().contains("format")
                        || message.to_lowercase().contains("schema"))
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelError::Timeout {
                duration: Duration::ZERO,
            }
        } else if err.is_decode() || err.is_body() {
            ModelError::protocol(err.to_string())
        } else if let Some(status) = err.status() {
            ModelError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ModelError::ConnectionFailed {
                message: err.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClaError>;
