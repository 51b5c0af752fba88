//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Reading or writing the store file failed.
    #[error("store I/O error: {reason}")]
    StoreIo { reason: String },

    /// Chat not found.
    #[error("chat not found: {chat_id}")]
    ChatNotFound { chat_id: i64 },

    /// Tool call against a provider with no live connection.
    #[error("provider '{provider}' is not connected")]
    NotConnected { provider: String },

    /// The model referenced a tool id the current catalog cannot resolve.
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// Tool call argument text is not a JSON object.
    #[error("malformed arguments for '{tool}': {reason}")]
    MalformedArguments { tool: String, reason: String },

    /// Spawn failure, channel error, or provider-reported error.
    #[error("tool provider error: {reason}")]
    ProviderTransport { reason: String },

    /// Authentication, quota, or network failure from the model provider.
    #[error("{reason}")]
    ModelRequest { reason: String },

    /// A turn is already in flight for this chat.
    #[error("a turn is already in progress for chat {chat_id}")]
    TurnInProgress { chat_id: i64 },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl From<McpError> for AgentError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::NotConnected { provider } => AgentError::NotConnected { provider },
            other => AgentError::ProviderTransport {
                reason: other.to_string(),
            },
        }
    }
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        AgentError::ModelRequest { reason: e.message() }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::StoreIo {
            reason: e.to_string(),
        }
    }
}
