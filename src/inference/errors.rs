//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// SSE stream parsing, chunk-level error, or an error event in the stream.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },

    /// No API key is configured for the selected provider.
    #[error("{provider} API key not configured")]
    MissingApiKey {
        provider: String,
    },
}

impl InferenceError {
    /// A message fit for showing to the user.
    ///
    /// For HTTP errors, providers put the useful part in `error.message` of a
    /// JSON body; that is preferred over the raw body when present.
    pub fn message(&self) -> String {
        match self {
            InferenceError::HttpError { status, body } => {
                let detail = serde_json::from_str::<serde_json::Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.pointer("/error/message")
                            .and_then(|m| m.as_str())
                            .map(String::from)
                    });
                match detail {
                    Some(msg) => format!("{status}: {msg}"),
                    None if body.trim().is_empty() => format!("HTTP {status}"),
                    None => format!("HTTP {status}: {}", body.trim()),
                }
            }
            other => other.to_string(),
        }
    }
}
