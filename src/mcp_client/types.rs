//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Separator between provider id and tool name in a fully-qualified tool name.
pub const QUALIFIED_NAME_SEPARATOR: &str = "::";

/// Protocol revision sent during the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Any message a provider can write to its stdout.
///
/// Providers interleave responses to our requests with their own requests
/// (`roots/list`, `ping`) and notifications, so every line is first parsed
/// into this loose shape and classified afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Resource descriptor as returned by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A tool tagged with the provider that declared it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub provider_id: String,
    pub tool_name: String,
    pub fully_qualified_name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Build a descriptor from a provider's tool definition.
    pub fn from_definition(provider_id: &str, def: &McpToolDefinition) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            tool_name: def.name.clone(),
            fully_qualified_name: qualify(provider_id, &def.name),
            description: def.description.clone(),
            input_schema: def.input_schema.clone(),
        }
    }
}

/// Join a provider id and tool name into `provider::tool`.
pub fn qualify(provider_id: &str, tool_name: &str) -> String {
    format!("{provider_id}{QUALIFIED_NAME_SEPARATOR}{tool_name}")
}

/// Split `provider::tool` into its parts.
///
/// Splits on the first separator, so tool names may themselves contain `::`.
/// Returns `None` if either side is empty.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    let (provider, tool) = name.split_once(QUALIFIED_NAME_SEPARATOR)?;
    if provider.is_empty() || tool.is_empty() {
        return None;
    }
    Some((provider, tool))
}

/// Launch configuration for a tool provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Persisted alongside the launch config; `false` skips auto-connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// A directory the host exposes to a provider through `roots/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub uri: String,
    pub name: String,
}

/// Snapshot of a live provider connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub name: String,
    pub connected: bool,
    pub tool_count: usize,
    pub resource_count: usize,
    pub tools: Vec<McpToolDefinition>,
    pub resources: Vec<ResourceDescriptor>,
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// The provider's full result payload.
    pub payload: serde_json::Value,
    /// Set when the provider flagged the result with `isError`.
    pub is_error: bool,
}

impl ToolCallResult {
    /// Wrap a raw `tools/call` result.
    pub fn from_payload(payload: serde_json::Value) -> Self {
        let is_error = payload
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self { payload, is_error }
    }

    /// The part of the payload handed back to the model: `content` when
    /// present, otherwise the whole payload.
    pub fn model_content(&self) -> &serde_json::Value {
        match self.payload.get("content") {
            Some(content) if !content.is_null() => content,
            _ => &self.payload,
        }
    }
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

// ─── Standard JSON-RPC Error Codes ───────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        // params should be omitted when None
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_json_rpc_request_with_params() {
        let params = serde_json::json!({"name": "search", "arguments": {"q": "rust"}});
        let req = JsonRpcRequest::new(42, "tools/call", Some(params));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"id\":42"));
        assert!(json.contains("tools/call"));
        assert!(json.contains("rust"));
    }

    #[test]
    fn test_incoming_message_classifies_server_request() {
        let json = r#"{"jsonrpc":"2.0","id":0,"method":"roots/list"}"#;
        let msg: IncomingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.method.as_deref(), Some("roots/list"));
        assert_eq!(msg.id, Some(serde_json::json!(0)));
    }

    #[test]
    fn test_tool_definition_reads_input_schema() {
        let json = r#"{"name": "search", "inputSchema": {"type": "object"}}"#;
        let tool: McpToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.description.is_none());
    }

    #[test]
    fn test_qualify_and_split() {
        let fq = qualify("github", "create_issue");
        assert_eq!(fq, "github::create_issue");
        assert_eq!(split_qualified(&fq), Some(("github", "create_issue")));
    }

    #[test]
    fn test_split_keeps_separator_in_tool_name() {
        assert_eq!(split_qualified("a::b::c"), Some(("a", "b::c")));
        assert_eq!(split_qualified("::tool"), None);
        assert_eq!(split_qualified("no_separator"), None);
    }

    #[test]
    fn test_tool_call_result_model_content() {
        let result = ToolCallResult::from_payload(serde_json::json!({
            "content": [{"type": "text", "text": "ok"}],
        }));
        assert!(!result.is_error);
        assert_eq!(result.model_content()[0]["text"], "ok");

        let bare = ToolCallResult::from_payload(serde_json::json!({"value": 3}));
        assert_eq!(bare.model_content()["value"], 3);
    }

    #[test]
    fn test_tool_call_result_error_flag() {
        let result = ToolCallResult::from_payload(serde_json::json!({
            "content": [{"type": "text", "text": "boom"}],
            "isError": true,
        }));
        assert!(result.is_error);
    }

    #[test]
    fn test_server_config_enabled_roundtrip() {
        let json = r#"{"command": "npx", "args": ["-y", "pkg"], "enabled": false}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.enabled, Some(false));
        assert!(cfg.env.is_empty());
    }
}
