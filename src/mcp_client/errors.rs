//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during tool provider operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A provider process failed to start.
    #[error("failed to spawn provider '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("provider '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error, closed pipe).
    #[error("transport error for provider '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Provider returned a JSON-RPC error response.
    #[error("provider error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A provider id that cannot be used in qualified tool names.
    #[error("invalid provider id '{provider}': {reason}")]
    InvalidProviderId {
        provider: String,
        reason: String,
    },

    /// No live connection for the requested provider id.
    #[error("provider '{provider}' is not connected")]
    NotConnected {
        provider: String,
    },

    /// A request did not complete within the configured timeout.
    #[error("'{method}' on provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout {
        provider: String,
        method: String,
        timeout_ms: u64,
    },
}
