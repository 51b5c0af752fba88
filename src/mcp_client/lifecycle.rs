//! Provider process lifecycle management.
//!
//! Handles spawning, the initialize handshake, best-effort discovery, and
//! shutting down tool provider child processes. Each provider runs as a
//! separate OS process communicating via JSON-RPC over stdio.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::transport::StdioTransport;
use super::types::{
    ConnectionInfo, InitializeResult, McpToolDefinition, ResourceDescriptor, Root, ServerConfig,
    PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
///
/// `npx`-launched providers may download their package on first use.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for each discovery request (`tools/list`, `resources/list`).
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on `nextCursor` pages followed per listing.
const MAX_DISCOVERY_PAGES: usize = 50;

/// Stderr lines retained for error context.
const STDERR_TAIL_LINES: usize = 20;

// ─── ProviderConnection ──────────────────────────────────────────────────────

/// A running tool provider process with its transport and discovered catalog.
///
/// The child is spawned with `kill_on_drop`, so dropping the last handle
/// terminates the process even if [`ProviderConnection::shutdown`] was never
/// reached.
pub struct ProviderConnection {
    /// Provider id (e.g., "filesystem").
    pub name: String,
    process: Mutex<Child>,
    transport: StdioTransport,
    tools: Vec<McpToolDefinition>,
    resources: Vec<ResourceDescriptor>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProviderConnection {
    /// Spawn a provider, perform the handshake, and discover its catalog.
    pub async fn spawn(name: &str, config: &ServerConfig) -> Result<Self, McpError> {
        let command = resolve_command(&config.command);
        tracing::info!(provider = name, command = %command, args = ?config.args, "spawning provider");

        let mut cmd = Command::new(&command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{command}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(StdMutex::new(VecDeque::new()));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| forward_stderr(name, stderr, Arc::clone(&stderr_tail)));

        let transport = StdioTransport::new(name, stdout, stdin, roots_from_args(&config.args));

        let init = match tokio::time::timeout(INIT_TIMEOUT, handshake(&transport, name)).await {
            Ok(Ok(init)) => init,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                let stderr_ctx = collect_tail(&stderr_tail).await;
                return Err(McpError::InitFailed {
                    name: name.to_string(),
                    reason: format!("{e}{}", format_stderr_suffix(&stderr_ctx)),
                });
            }
            Err(_) => {
                let _ = child.kill().await;
                let stderr_ctx = collect_tail(&stderr_tail).await;
                return Err(McpError::InitFailed {
                    name: name.to_string(),
                    reason: format!(
                        "initialization timed out after {}s{}",
                        INIT_TIMEOUT.as_secs(),
                        format_stderr_suffix(&stderr_ctx)
                    ),
                });
            }
        };

        if let Some(info) = &init.server_info {
            tracing::debug!(
                provider = name,
                server_name = ?info.name,
                server_version = ?info.version,
                protocol = ?init.protocol_version,
                "provider initialized"
            );
        }

        let (tools, resources) = discover(&transport, name).await;

        tracing::info!(
            provider = name,
            tools = tools.len(),
            resources = resources.len(),
            "provider connected"
        );

        Ok(Self {
            name: name.to_string(),
            process: Mutex::new(child),
            transport,
            tools,
            resources,
            stderr_task,
        })
    }

    /// Tools declared by this provider, in declared order.
    pub fn tools(&self) -> &[McpToolDefinition] {
        &self.tools
    }

    /// Resources declared by this provider.
    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    /// Roots this provider is scoped to (derived from its launch args).
    pub fn roots(&self) -> &[Root] {
        self.transport.roots()
    }

    /// Check if the provider process is still running.
    pub async fn is_alive(&self) -> bool {
        let mut process = self.process.lock().await;
        matches!(process.try_wait(), Ok(None))
    }

    /// Snapshot for the UI.
    pub async fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            name: self.name.clone(),
            connected: self.is_alive().await,
            tool_count: self.tools.len(),
            resource_count: self.resources.len(),
            tools: self.tools.clone(),
            resources: self.resources.clone(),
        }
    }

    /// Forward a `tools/call` request.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        self.transport.request("tools/call", Some(params)).await
    }

    /// Forward a `resources/read` request.
    pub async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, McpError> {
        self.transport
            .request("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await
    }

    /// Close stdin, wait briefly for a graceful exit, then force-kill.
    pub async fn shutdown(&self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(provider = %self.name, error = %e, "stdin close failed");
        }

        let mut process = self.process.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, process.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(provider = %self.name, %status, "provider exited");
            }
            _ => {
                tracing::warn!(provider = %self.name, "provider did not exit, killing");
                let _ = process.kill().await;
            }
        }

        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }
}

// ─── Handshake & Discovery ───────────────────────────────────────────────────

/// Perform the MCP initialization handshake.
pub(crate) async fn handshake(
    transport: &StdioTransport,
    server_name: &str,
) -> Result<InitializeResult, McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "roots": { "listChanged": true }
        },
        "clientInfo": {
            "name": "databrain",
            "version": env!("CARGO_PKG_VERSION"),
        }
    });

    let result = transport.request("initialize", Some(params)).await?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    transport.notify("notifications/initialized", None).await?;
    Ok(init)
}

/// List tools and resources independently. A failing listing yields an empty
/// list for that category.
pub(crate) async fn discover(
    transport: &StdioTransport,
    server_name: &str,
) -> (Vec<McpToolDefinition>, Vec<ResourceDescriptor>) {
    let tools = match list_paginated(transport, server_name, "tools/list", "tools").await {
        Ok(items) => parse_items::<McpToolDefinition>(server_name, items),
        Err(e) => {
            tracing::info!(provider = server_name, reason = %e, "provider has no tools");
            Vec::new()
        }
    };

    let resources = match list_paginated(transport, server_name, "resources/list", "resources").await {
        Ok(items) => parse_items::<ResourceDescriptor>(server_name, items),
        Err(e) => {
            tracing::info!(provider = server_name, reason = %e, "provider has no resources");
            Vec::new()
        }
    };

    (tools, resources)
}

/// Run a list request, following `nextCursor` until exhausted.
async fn list_paginated(
    transport: &StdioTransport,
    server_name: &str,
    method: &str,
    key: &str,
) -> Result<Vec<serde_json::Value>, McpError> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_DISCOVERY_PAGES {
        let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
        let page = tokio::time::timeout(DISCOVERY_TIMEOUT, transport.request(method, params))
            .await
            .map_err(|_| McpError::Timeout {
                provider: server_name.to_string(),
                method: method.to_string(),
                timeout_ms: DISCOVERY_TIMEOUT.as_millis() as u64,
            })??;

        if let Some(batch) = page.get(key).and_then(|v| v.as_array()) {
            items.extend(batch.iter().cloned());
        }

        cursor = page
            .get("nextCursor")
            .and_then(|v| v.as_str())
            .filter(|c| !c.is_empty())
            .map(String::from);
        if cursor.is_none() {
            break;
        }
    }

    Ok(items)
}

fn parse_items<T: serde::de::DeserializeOwned>(
    server_name: &str,
    items: Vec<serde_json::Value>,
) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(provider = server_name, error = %e, "skipping malformed catalog entry");
                None
            }
        })
        .collect()
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Resolve the launch command. `npx` is a batch shim on Windows.
pub fn resolve_command(command: &str) -> String {
    if command == "npx" && cfg!(target_os = "windows") {
        "npx.cmd".to_string()
    } else {
        command.to_string()
    }
}

/// Derive filesystem roots from launch arguments.
///
/// Any argument that is not a flag and looks like a path (contains `:`, `/`
/// or `\`) becomes a root.
pub fn roots_from_args(args: &[String]) -> Vec<Root> {
    args.iter()
        .filter(|arg| !arg.starts_with('-'))
        .filter(|arg| arg.contains(':') || arg.contains('/') || arg.contains('\\'))
        .map(|dir| {
            let normalized = dir.replace('\\', "/");
            let name = normalized
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            Root {
                uri: format!("file://{normalized}"),
                name,
            }
        })
        .collect()
}

/// Forward provider stderr to tracing, keeping the last lines for errors.
fn forward_stderr(
    name: &str,
    stderr: ChildStderr,
    tail: Arc<StdMutex<VecDeque<String>>>,
) -> JoinHandle<()> {
    let provider = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(provider = %provider, "stderr: {line}");
            if let Ok(mut buf) = tail.lock() {
                if buf.len() == STDERR_TAIL_LINES {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
        }
    })
}

/// Give the stderr task a moment to drain, then join the retained lines.
async fn collect_tail(tail: &Arc<StdMutex<VecDeque<String>>>) -> String {
    tokio::time::sleep(Duration::from_millis(200)).await;
    match tail.lock() {
        Ok(buf) => buf.iter().cloned().collect::<Vec<_>>().join("\n"),
        Err(_) => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
