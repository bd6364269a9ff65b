//! Error types for the notebus client

use thiserror::Error;

/// Errors that can occur when using the notebus client
#[derive(Error, Debug)]
pub enum NotebusError {
    /// The HTTP API returned a non-success response, or a success response
    /// whose body was not valid JSON
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Authorization polling exceeded its timeout budget
    #[error("Authorization check timed out")]
    Timeout,

    /// WebSocket handshake or transport failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// An inbound frame could not even be classified as a stream message
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller misuse, e.g. sending before connecting
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The current credential lacks a required permission scope
    #[error("Permission denied: missing scope {0}")]
    PermissionDenied(String),

    /// Failed to serialize an outbound message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport failure (connection refused, DNS, request build)
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for notebus operations
pub type Result<T> = std::result::Result<T, NotebusError>;
