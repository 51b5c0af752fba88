//! Tool routing: the in-flight tool-call table and batch dispatch.
//!
//! Streamed tool-call fragments are folded into a [`ToolCallTable`] keyed by
//! the provider-assigned index. On `End` the table becomes a batch of
//! requests, each resolved through the external-name mapping and sent to
//! its provider. Calls in a batch run concurrently; every call yields a
//! result, successful or not, and a failure never aborts its siblings.

use std::collections::HashMap;
use std::time::Instant;

use futures::future::join_all;

use crate::inference::catalog::ToolCatalog;
use crate::inference::types::{FunctionCallResponse, ToolCallResponse};
use crate::mcp_client::{split_qualified, ToolHost};

use super::errors::AgentError;

// ─── In-flight table ────────────────────────────────────────────────────────

/// A tool call being assembled from streamed fragments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InFlightToolCall {
    pub index: u32,
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// Fragments keyed by index, iterated in first-seen order.
#[derive(Debug, Default)]
pub struct ToolCallTable {
    order: Vec<u32>,
    calls: HashMap<u32, InFlightToolCall>,
}

impl ToolCallTable {
    /// Fold one fragment. The first fragment for an index creates the
    /// entry; later ones append to its name and argument text.
    pub fn fold(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) {
        let entry = self.calls.entry(index).or_insert_with(|| {
            self.order.push(index);
            InFlightToolCall {
                index,
                ..Default::default()
            }
        });
        if entry.id.is_none() {
            entry.id = id.filter(|i| !i.is_empty());
        }
        if let Some(name) = name {
            entry.name.push_str(&name);
        }
        if let Some(arguments) = arguments {
            entry.arguments.push_str(&arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &InFlightToolCall> {
        self.order.iter().filter_map(|i| self.calls.get(i))
    }

    /// Finalize into assistant tool-call requests. Missing ids get a fresh
    /// `call_…` id and empty argument text becomes `{}`.
    pub fn into_requests(self) -> Vec<ToolCallResponse> {
        let Self { order, mut calls } = self;
        order
            .into_iter()
            .filter_map(|i| calls.remove(&i))
            .map(|call| ToolCallResponse {
                id: call
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4())),
                r#type: "function".to_string(),
                function: FunctionCallResponse {
                    name: call.name,
                    arguments: if call.arguments.trim().is_empty() {
                        "{}".to_string()
                    } else {
                        call.arguments
                    },
                },
            })
            .collect()
    }
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

/// Outcome of one dispatched call.
#[derive(Debug)]
pub struct ToolOutcome {
    pub call_id: String,
    pub external_name: String,
    pub result: Result<serde_json::Value, AgentError>,
    pub execution_time_ms: u64,
}

impl ToolOutcome {
    /// Content of the `tool` message answering this call: the JSON of the
    /// result, or `{"error": message}`.
    pub fn content(&self) -> String {
        match &self.result {
            Ok(value) => serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()),
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Dispatch a batch concurrently. Results come back in request order.
pub async fn dispatch_batch(
    host: &dyn ToolHost,
    catalog: &ToolCatalog,
    requests: &[ToolCallResponse],
) -> Vec<ToolOutcome> {
    tracing::info!(call_count = requests.len(), "=== TOOL DISPATCH ===");

    let outcomes = join_all(
        requests
            .iter()
            .map(|request| dispatch_single(host, catalog, request)),
    )
    .await;

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    tracing::info!(
        call_count = outcomes.len(),
        failed,
        "tool dispatch complete"
    );
    outcomes
}

/// Resolve, parse, and execute one call.
pub async fn dispatch_single(
    host: &dyn ToolHost,
    catalog: &ToolCatalog,
    request: &ToolCallResponse,
) -> ToolOutcome {
    let start = Instant::now();
    let external_name = request.function.name.clone();
    let result = execute(host, catalog, request).await;
    let execution_time_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => tracing::info!(
            tool = %external_name,
            call_id = %request.id,
            execution_time_ms,
            "tool call succeeded"
        ),
        Err(e) => tracing::warn!(
            tool = %external_name,
            call_id = %request.id,
            error = %e,
            "tool call failed"
        ),
    }

    ToolOutcome {
        call_id: request.id.clone(),
        external_name,
        result,
        execution_time_ms,
    }
}

async fn execute(
    host: &dyn ToolHost,
    catalog: &ToolCatalog,
    request: &ToolCallResponse,
) -> Result<serde_json::Value, AgentError> {
    let external_name = &request.function.name;
    let unknown = || AgentError::UnknownTool {
        name: external_name.clone(),
    };

    let fq_name = catalog.resolve(external_name).ok_or_else(unknown)?;
    let (provider, tool) = split_qualified(fq_name).ok_or_else(unknown)?;
    let arguments = parse_arguments(external_name, &request.function.arguments)?;

    let result = host.call_tool(provider, tool, arguments).await?;
    if result.is_error {
        tracing::warn!(provider, tool, "provider flagged tool result as error");
    }
    Ok(result.model_content().clone())
}

/// Parse argument text as a JSON object. Blank text means no arguments.
pub fn parse_arguments(tool: &str, text: &str) -> Result<serde_json::Value, AgentError> {
    if text.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| AgentError::MalformedArguments {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(AgentError::MalformedArguments {
            tool: tool.to_string(),
            reason: "arguments must be a JSON object".to_string(),
        });
    }
    Ok(value)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
