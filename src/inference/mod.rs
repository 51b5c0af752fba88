//! Model Gateway: OpenAI-compatible API client for hosted providers.
//!
//! This module handles all communication with the model provider:
//! - Streaming and non-streaming chat completions
//! - SSE stream parsing into gateway events
//! - The external tool catalog and its name mapping
//! - Attachment expansion and capability checks
//! - Provider presets and `gateway.yaml` configuration
//!
//! Every provider is spoken to through the Chat Completions API, so
//! switching provider is a settings change, not a code change.

pub mod catalog;
pub mod client;
pub mod config;
pub mod errors;
pub mod messages;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use catalog::{build_external_tool_catalog, ToolCatalog};
pub use client::{EventStream, InferenceClient, ModelBackend};
pub use config::{GatewayConfig, ProviderKind};
pub use errors::InferenceError;
pub use messages::{format_messages, supports_function_calling, supports_vision};
pub use types::{ChatMessage, Role, StreamEvent, ToolCallResponse, ToolDefinition};
