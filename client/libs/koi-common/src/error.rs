//! Unified error handling for the koi client crates
//!
//! Every failure path in the realtime and REST layers degrades to a
//! `ClientError`; none of them is process-fatal.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for the koi client crates
pub type Result<T> = std::result::Result<T, ClientError>;

/// Message shown when the server did not provide one.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Client error taxonomy
#[derive(Error, Debug)]
pub enum ClientError {
    /// No auth token or user id in local storage
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    /// Connect failure or dropped connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Hub or engine handshake rejected
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Malformed frame on a realtime connection
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Remote method invocation returned an error
    #[error("Invocation of {method} failed: {message}")]
    Invocation { method: String, message: String },

    /// Non-success HTTP response
    #[error("HTTP {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Http { status: u16, message: Option<String> },

    /// 401 from the REST API
    #[error("Unauthorized")]
    Unauthorized,

    /// REST request exceeded the fixed timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Local key-value storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not attempted because there is no live connection
    #[error("Not connected")]
    NotConnected,

    /// Result dropped because the owner was closed
    #[error("Operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// HTTP status code carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Unauthorized => Some(401),
            _ => None,
        }
    }

    /// Server-provided message, if any
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Http { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// Text suitable for an error toast
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout(_) => "The request timed out. Please try again.".to_string(),
            Self::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
            _ => self
                .server_message()
                .unwrap_or(GENERIC_ERROR_MESSAGE)
                .to_string(),
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Handshake(_) | Self::Timeout(_) | Self::NotConnected
        )
    }
}
