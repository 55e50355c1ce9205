//! Error types for the testbridge agent
//!
//! Every failure raised while executing a command ends up as the `error`
//! string of a failed result envelope, so messages are written to be read
//! by whoever is looking at the orchestration server's test report.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the testbridge agent
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Not connected to the orchestration server")]
    NotConnected,

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    // === Command Errors ===
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout exceeded: {0}")]
    TimeoutExceeded(String),

    #[error("Unsupported action '{0}'")]
    UnsupportedAction(String),

    #[error("Invalid command arguments: {0}")]
    InvalidCommandArguments(String),

    #[error("Frame capture failed: {0}")]
    Capture(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a connection failed error
    pub fn connection_failed(url: &str, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid arguments error for an action missing a field
    pub fn missing_argument(action: &str, field: &str) -> Self {
        Self::InvalidCommandArguments(format!("'{}' requires '{}'", action, field))
    }

    /// Stable machine-readable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConnectionFailed { .. } | Error::ConnectionClosed(_) | Error::NotConnected => {
                "CONNECTION_ERROR"
            }
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::ElementNotFound(_) => "ELEMENT_NOT_FOUND",
            Error::AssertionFailed(_) => "ASSERTION_FAILED",
            Error::TimeoutExceeded(_) => "TIMEOUT",
            Error::UnsupportedAction(_) => "UNSUPPORTED_ACTION",
            Error::InvalidCommandArguments(_) => "INVALID_ARGUMENTS",
            Error::Capture(_) => "CAPTURE_FAILED",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether this error belongs to the connection scope rather than a command
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. } | Error::ConnectionClosed(_) | Error::NotConnected
        )
    }
}
