//! MCP Client: JSON-RPC over stdio transport for tool providers.
//!
//! This module handles:
//! - Spawning and tearing down provider child processes
//! - JSON-RPC 2.0 communication over process stdio, including answering
//!   the provider's `roots/list` queries
//! - Best-effort tool and resource discovery
//! - Tool call and resource read forwarding
//!
//! The registry is consumed by the orchestrator through the [`ToolHost`]
//! trait.

pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::McpError;
pub use registry::{ToolHost, ToolRegistry};
pub use types::{
    split_qualified, ConnectionInfo, ResourceDescriptor, Root, ServerConfig, ToolCallResult,
    ToolDescriptor, QUALIFIED_NAME_SEPARATOR,
};
