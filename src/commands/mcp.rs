//! Commands for MCP tool providers.
//!
//! Launch configs are persisted under `settings.mcpServers`, keyed by
//! provider name, with an `enabled` flag that controls auto-connect.

use std::collections::BTreeMap;

use crate::agent_core::Settings;
use crate::mcp_client::{ConnectionInfo, ServerConfig, ToolDescriptor, ToolHost};
use crate::AppState;

/// Settings key holding saved provider configs.
pub const MCP_SERVERS_KEY: &str = "mcpServers";

// ─── Connections ────────────────────────────────────────────────────────────

/// Connect a provider and save its config as enabled. Nothing is saved if
/// the connection fails.
pub async fn connect_server(
    state: &AppState,
    name: &str,
    config: ServerConfig,
) -> Result<ConnectionInfo, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("server name must not be empty".to_string());
    }
    let info = state
        .registry
        .connect(name, &config)
        .await
        .map_err(|e| e.to_string())?;

    let mut saved = saved_servers(&state.store.get_settings());
    saved.insert(
        name.to_string(),
        ServerConfig {
            enabled: Some(true),
            ..config
        },
    );
    store_servers(state, saved)?;

    tracing::info!(server = name, tools = info.tool_count, "MCP server connected and saved");
    Ok(info)
}

/// Disconnect a provider and mark its saved config disabled.
pub async fn disconnect_server(state: &AppState, name: &str) -> Result<(), String> {
    state.registry.disconnect(name).await;

    let mut saved = saved_servers(&state.store.get_settings());
    if let Some(config) = saved.get_mut(name) {
        config.enabled = Some(false);
        store_servers(state, saved)?;
    }
    Ok(())
}

/// Disconnect a provider and forget its saved config.
pub async fn remove_server(state: &AppState, name: &str) -> Result<(), String> {
    state.registry.disconnect(name).await;

    let mut saved = saved_servers(&state.store.get_settings());
    if saved.remove(name).is_some() {
        store_servers(state, saved)?;
        tracing::info!(server = name, "MCP server removed");
    }
    Ok(())
}

/// Live connections, sorted by name.
pub async fn list_servers(state: &AppState) -> Vec<ConnectionInfo> {
    state.registry.list_connections().await
}

/// Every tool of every live provider.
pub async fn list_tools(state: &AppState) -> Vec<ToolDescriptor> {
    state.registry.list_all_tools().await
}

/// Invoke a tool directly, outside any turn. Returns the provider's full
/// result payload.
pub async fn call_tool(
    state: &AppState,
    provider: &str,
    tool: &str,
    arguments: serde_json::Value,
) -> Result<serde_json::Value, String> {
    let result = state
        .registry
        .call_tool(provider, tool, arguments)
        .await
        .map_err(|e| e.to_string())?;
    Ok(result.payload)
}

/// Connect every saved server not explicitly disabled. Failures are logged
/// and returned, never fatal.
pub async fn connect_saved_servers(state: &AppState) -> Vec<(String, String)> {
    let saved = saved_servers(&state.store.get_settings());
    let mut failures = Vec::new();

    for (name, config) in saved {
        if config.enabled == Some(false) {
            tracing::debug!(server = %name, "saved MCP server disabled, skipping");
            continue;
        }
        match state.registry.connect(&name, &config).await {
            Ok(info) => tracing::info!(server = %name, tools = info.tool_count, "saved MCP server connected"),
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "MCP server failed to start (non-fatal)");
                failures.push((name, e.to_string()));
            }
        }
    }
    failures
}

// ─── Settings helpers ───────────────────────────────────────────────────────

/// Saved configs, sorted by name. Malformed entries are skipped.
pub fn saved_servers(settings: &Settings) -> BTreeMap<String, ServerConfig> {
    let Some(entries) = settings.get(MCP_SERVERS_KEY).and_then(|v| v.as_object()) else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(name, value)| match serde_json::from_value(value.clone()) {
            Ok(config) => Some((name.clone(), config)),
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "ignoring malformed saved MCP server");
                None
            }
        })
        .collect()
}

fn store_servers(state: &AppState, servers: BTreeMap<String, ServerConfig>) -> Result<(), String> {
    let value = serde_json::to_value(servers).map_err(|e| e.to_string())?;
    let mut patch = Settings::new();
    patch.insert(MCP_SERVERS_KEY.to_string(), value);
    state.store.save_settings(patch);
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (AppState::open(dir.path()), dir)
    }

    fn missing_binary() -> ServerConfig {
        ServerConfig {
            command: "/nonexistent/databrain-test-provider".into(),
            args: vec![],
            env: Default::default(),
            enabled: None,
        }
    }

    fn seed(state: &AppState, servers: serde_json::Value) {
        crate::commands::settings::save_settings(state, json!({ "mcpServers": servers })).unwrap();
    }

    #[tokio::test]
    async fn test_failed_connect_saves_nothing() {
        let (state, _dir) = state();
        assert!(connect_server(&state, "broken", missing_binary()).await.is_err());
        assert!(saved_servers(&state.store.get_settings()).is_empty());
        assert!(list_servers(&state).await.is_empty());
        assert!(connect_server(&state, "  ", missing_binary()).await.is_err());

        let err = connect_server(&state, "team::git", missing_binary()).await.unwrap_err();
        assert!(err.contains("must not contain '::'"));
        assert!(saved_servers(&state.store.get_settings()).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_marks_disabled() {
        let (state, _dir) = state();
        seed(&state, json!({"github": {"command": "npx", "args": ["gh"], "enabled": true}}));

        disconnect_server(&state, "github").await.unwrap();
        let saved = saved_servers(&state.store.get_settings());
        assert_eq!(saved["github"].enabled, Some(false));
        assert_eq!(saved["github"].args, vec!["gh"]);
    }

    #[tokio::test]
    async fn test_remove_forgets_config() {
        let (state, _dir) = state();
        seed(&state, json!({"a": {"command": "x"}, "b": {"command": "y"}}));

        remove_server(&state, "a").await.unwrap();
        let saved = saved_servers(&state.store.get_settings());
        assert_eq!(saved.keys().collect::<Vec<_>>(), vec!["b"]);
        remove_server(&state, "unknown").await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_saved_skips_disabled_and_reports_failures() {
        let (state, _dir) = state();
        seed(
            &state,
            json!({
                "off": {"command": "/nonexistent/off", "enabled": false},
                "on": {"command": "/nonexistent/on"},
                "junk": 42
            }),
        );

        let failures = connect_saved_servers(&state).await;
        let names: Vec<_> = failures.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["on"]);
    }

    #[tokio::test]
    async fn test_call_tool_without_provider() {
        let (state, _dir) = state();
        let err = call_tool(&state, "github", "search", json!({})).await.unwrap_err();
        assert_eq!(err, "provider 'github' is not connected");
        assert!(list_tools(&state).await.is_empty());
    }
}
