//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with tool provider child processes:
//! - Writing JSON-RPC requests to stdin
//! - Reading JSON-RPC responses from stdout
//! - Answering requests the provider sends back to us (`roots/list`, `ping`)
//! - Line-delimited JSON protocol (one JSON object per line)

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{error_codes, IncomingMessage, JsonRpcError, JsonRpcRequest, Root};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Both halves of the pipe. Locked together for a whole exchange so that
/// concurrent callers can never read each other's responses.
struct Channel {
    writer: BoxedWriter,
    reader: BufReader<BoxedReader>,
}

/// Bi-directional JSON-RPC transport over a provider's stdio.
pub struct StdioTransport {
    server_name: String,
    channel: Mutex<Channel>,
    roots: Vec<Root>,
}

impl StdioTransport {
    /// Create a transport over any byte pipe pair (child stdio in production,
    /// in-memory duplex pipes in tests).
    ///
    /// `roots` is what the transport answers when the provider asks
    /// `roots/list`.
    pub fn new<R, W>(server_name: &str, reader: R, writer: W, roots: Vec<Root>) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let reader: BoxedReader = Box::pin(reader);
        let writer: BoxedWriter = Box::pin(writer);
        Self {
            server_name: server_name.to_string(),
            channel: Mutex::new(Channel {
                writer,
                reader: BufReader::new(reader),
            }),
            roots,
        }
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Lines that are not JSON (provider log output) are skipped. Requests the
    /// provider makes while we wait are answered inline.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&req).map_err(|e| self.transport_err(format!(
            "failed to serialize request: {e}"
        )))?;

        let mut channel = self.channel.lock().await;
        self.write_line(&mut channel.writer, &line).await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = channel
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_err(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_err(
                    "provider stdout closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let msg = match serde_json::from_str::<IncomingMessage>(trimmed) {
                Ok(msg) => msg,
                Err(_) => {
                    tracing::trace!(provider = %self.server_name, line = %trimmed, "skipping non-JSON line");
                    continue;
                }
            };

            match (&msg.method, &msg.id) {
                (Some(inbound), Some(inbound_id)) => {
                    let reply = self.answer(inbound, inbound_id.clone());
                    self.write_line(&mut channel.writer, &reply).await?;
                }
                (Some(inbound), None) => {
                    tracing::debug!(provider = %self.server_name, method = %inbound, "provider notification");
                }
                (None, Some(resp_id)) if resp_id.as_u64() == Some(id) => {
                    return extract_result(msg);
                }
                _ => {
                    tracing::debug!(provider = %self.server_name, "skipping response for another request");
                }
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        let line = serde_json::to_string(&notification).map_err(|e| {
            self.transport_err(format!("failed to serialize notification: {e}"))
        })?;

        let mut channel = self.channel.lock().await;
        self.write_line(&mut channel.writer, &line).await
    }

    /// Close the write side. Well-behaved providers exit on stdin EOF.
    pub async fn close(&self) -> Result<(), McpError> {
        let mut channel = self.channel.lock().await;
        channel
            .writer
            .shutdown()
            .await
            .map_err(|e| self.transport_err(format!("failed to close stdin: {e}")))
    }

    /// The roots answered to `roots/list`.
    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    /// Build the reply line for a provider-initiated request.
    fn answer(&self, method: &str, id: serde_json::Value) -> String {
        let reply = match method {
            "roots/list" => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "roots": self.roots },
            }),
            "ping" => serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {},
            }),
            other => {
                tracing::debug!(provider = %self.server_name, method = %other, "unsupported provider request");
                let err = JsonRpcError {
                    code: error_codes::METHOD_NOT_FOUND,
                    message: format!("Method not found: {other}"),
                    data: None,
                };
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": err,
                })
            }
        };
        reply.to_string()
    }

    async fn write_line(&self, writer: &mut BoxedWriter, line: &str) -> Result<(), McpError> {
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_err(format!("failed to write to stdin: {e}")))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| self.transport_err(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_err(format!("failed to flush stdin: {e}")))
    }

    fn transport_err(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: IncomingMessage) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
