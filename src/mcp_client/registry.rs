//! Tool registry: the set of live provider connections.
//!
//! Provides:
//! - Idempotent connect (one process per provider id, even under races)
//! - Disconnect / disconnect-all with guaranteed process teardown
//! - The flattened tool catalog, tagged with provider ids
//! - Tool call and resource read forwarding with a per-call timeout

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::errors::McpError;
use super::lifecycle::ProviderConnection;
use super::types::{
    ConnectionInfo, Root, ServerConfig, ToolCallResult, ToolDescriptor, QUALIFIED_NAME_SEPARATOR,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for tool call execution (ms).
const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Provider ids prefix qualified tool names, which split on the first
/// separator, so an id must not contain one.
fn validate_provider_id(provider_id: &str) -> Result<(), McpError> {
    let reason = if provider_id.is_empty() {
        "must not be empty".to_string()
    } else if provider_id.contains(QUALIFIED_NAME_SEPARATOR) {
        format!("must not contain '{QUALIFIED_NAME_SEPARATOR}'")
    } else {
        return Ok(());
    };
    Err(McpError::InvalidProviderId {
        provider: provider_id.to_string(),
        reason,
    })
}

// ─── ToolHost ────────────────────────────────────────────────────────────────

/// What the orchestrator needs from the tool layer.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Every connected provider's tools, providers ordered by id.
    async fn list_all_tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke `tool_name` on `provider_id`.
    async fn call_tool(
        &self,
        provider_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError>;

    /// Read a resource from `provider_id`.
    async fn read_resource(
        &self,
        provider_id: &str,
        uri: &str,
    ) -> Result<serde_json::Value, McpError>;

    /// Roots of a connected provider, `None` if not connected.
    async fn roots(&self, provider_id: &str) -> Option<Vec<Root>>;
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Live connections to tool providers, keyed by provider id.
///
/// Constructed explicitly and shared by `Arc`; there is no global instance.
pub struct ToolRegistry {
    connections: RwLock<HashMap<String, Arc<ProviderConnection>>>,
    /// Serializes the spawn path so two racing connects for the same id
    /// cannot both launch a process.
    connect_lock: Mutex<()>,
    call_timeout_ms: u64,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connect_lock: Mutex::new(()),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }

    /// Set the tool call timeout in milliseconds.
    pub fn with_call_timeout(mut self, timeout_ms: u64) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }

    pub fn call_timeout_ms(&self) -> u64 {
        self.call_timeout_ms
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect to a provider, or return the existing connection's info.
    pub async fn connect(
        &self,
        provider_id: &str,
        config: &ServerConfig,
    ) -> Result<ConnectionInfo, McpError> {
        validate_provider_id(provider_id)?;
        if let Some(existing) = self.get(provider_id).await {
            return Ok(existing.info().await);
        }

        let _guard = self.connect_lock.lock().await;
        // Re-check: another caller may have finished connecting while we waited.
        if let Some(existing) = self.get(provider_id).await {
            return Ok(existing.info().await);
        }

        let connection = Arc::new(ProviderConnection::spawn(provider_id, config).await?);
        let info = connection.info().await;
        self.connections
            .write()
            .await
            .insert(provider_id.to_string(), connection);
        Ok(info)
    }

    /// Disconnect a provider. No-op if not connected.
    pub async fn disconnect(&self, provider_id: &str) {
        let removed = self.connections.write().await.remove(provider_id);
        if let Some(connection) = removed {
            connection.shutdown().await;
            tracing::info!(provider = provider_id, "provider disconnected");
        }
    }

    /// Disconnect every provider. Called once at process shutdown.
    pub async fn disconnect_all(&self) {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        futures::future::join_all(drained.iter().map(|(_, conn)| conn.shutdown())).await;
        tracing::info!(count, "all providers disconnected");
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Whether `provider_id` has a live connection.
    pub async fn is_connected(&self, provider_id: &str) -> bool {
        self.connections.read().await.contains_key(provider_id)
    }

    /// Info for every connection, sorted by provider id.
    pub async fn list_connections(&self) -> Vec<ConnectionInfo> {
        let mut infos = Vec::new();
        for connection in self.snapshot().await {
            infos.push(connection.info().await);
        }
        infos
    }

    /// Connections sorted by provider id, cloned out from under the lock.
    async fn snapshot(&self) -> Vec<Arc<ProviderConnection>> {
        let mut conns: Vec<_> = self.connections.read().await.values().cloned().collect();
        conns.sort_by(|a, b| a.name.cmp(&b.name));
        conns
    }

    async fn get(&self, provider_id: &str) -> Option<Arc<ProviderConnection>> {
        self.connections.read().await.get(provider_id).cloned()
    }

    async fn require(&self, provider_id: &str) -> Result<Arc<ProviderConnection>, McpError> {
        self.get(provider_id).await.ok_or_else(|| McpError::NotConnected {
            provider: provider_id.to_string(),
        })
    }

    async fn with_timeout<T>(
        &self,
        provider_id: &str,
        method: &str,
        fut: impl std::future::Future<Output = Result<T, McpError>>,
    ) -> Result<T, McpError> {
        tokio::time::timeout(Duration::from_millis(self.call_timeout_ms), fut)
            .await
            .map_err(|_| McpError::Timeout {
                provider: provider_id.to_string(),
                method: method.to_string(),
                timeout_ms: self.call_timeout_ms,
            })?
    }
}

#[async_trait]
impl ToolHost for ToolRegistry {
    async fn list_all_tools(&self) -> Vec<ToolDescriptor> {
        self.snapshot()
            .await
            .iter()
            .flat_map(|conn| {
                conn.tools()
                    .iter()
                    .map(|def| ToolDescriptor::from_definition(&conn.name, def))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    async fn call_tool(
        &self,
        provider_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        let connection = self.require(provider_id).await?;

        let start = Instant::now();
        let payload = self
            .with_timeout(
                provider_id,
                "tools/call",
                connection.call_tool(tool_name, arguments),
            )
            .await?;
        let result = ToolCallResult::from_payload(payload);

        tracing::debug!(
            provider = provider_id,
            tool = tool_name,
            is_error = result.is_error,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tool call completed"
        );
        Ok(result)
    }

    async fn read_resource(
        &self,
        provider_id: &str,
        uri: &str,
    ) -> Result<serde_json::Value, McpError> {
        let connection = self.require(provider_id).await?;
        self.with_timeout(provider_id, "resources/read", connection.read_resource(uri))
            .await
    }

    async fn roots(&self, provider_id: &str) -> Option<Vec<Root>> {
        self.get(provider_id).await.map(|conn| conn.roots().to_vec())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
