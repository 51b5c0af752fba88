//! Scripted fakes of the tool host and model backend, shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::inference::client::{EventStream, ModelBackend};
use crate::inference::types::{ChatMessage, Completion, StreamEvent, ToolDefinition};
use crate::inference::InferenceError;
use crate::mcp_client::{McpError, Root, ToolCallResult, ToolDescriptor, ToolHost};

// ─── FakeToolHost ───────────────────────────────────────────────────────────

/// Tool host with in-memory providers. Every call succeeds with a text
/// result naming the tool, unless the provider is absent.
#[derive(Default)]
pub struct FakeToolHost {
    tools: Vec<ToolDescriptor>,
    resources: HashMap<String, String>,
    roots: HashMap<String, Vec<Root>>,
    pub calls: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl FakeToolHost {
    pub fn with_tool(mut self, provider: &str, tool: &str) -> Self {
        self.tools.push(ToolDescriptor {
            provider_id: provider.into(),
            tool_name: tool.into(),
            fully_qualified_name: format!("{provider}::{tool}"),
            description: Some(format!("{tool} tool")),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        });
        self
    }

    pub fn with_root(mut self, provider: &str, uri: &str) -> Self {
        self.roots.entry(provider.into()).or_default().push(Root {
            uri: uri.into(),
            name: "root".into(),
        });
        self
    }

    pub fn with_resource(mut self, uri: &str, text: &str) -> Self {
        self.resources.insert(uri.into(), text.into());
        self
    }

    /// Forget a provider's tools, as if it had been disconnected.
    pub fn disconnect(&mut self, provider: &str) {
        self.tools.retain(|t| t.provider_id != provider);
        self.roots.remove(provider);
    }

    pub fn recorded_calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn is_connected(&self, provider: &str) -> bool {
        self.tools.iter().any(|t| t.provider_id == provider) || self.roots.contains_key(provider)
    }
}

#[async_trait]
impl ToolHost for FakeToolHost {
    async fn list_all_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools = self.tools.clone();
        tools.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        tools
    }

    async fn call_tool(
        &self,
        provider_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        if !self.is_connected(provider_id) {
            return Err(McpError::NotConnected {
                provider: provider_id.into(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push((provider_id.into(), tool_name.into(), arguments));
        Ok(ToolCallResult::from_payload(serde_json::json!({
            "content": [{"type": "text", "text": format!("{tool_name} ok")}]
        })))
    }

    async fn read_resource(
        &self,
        provider_id: &str,
        uri: &str,
    ) -> Result<serde_json::Value, McpError> {
        if !self.is_connected(provider_id) {
            return Err(McpError::NotConnected {
                provider: provider_id.into(),
            });
        }
        match self.resources.get(uri) {
            Some(text) => Ok(serde_json::json!({"contents": [{"uri": uri, "text": text}]})),
            None => Err(McpError::ServerError {
                code: -32002,
                message: format!("resource not found: {uri}"),
                data: None,
            }),
        }
    }

    async fn roots(&self, provider_id: &str) -> Option<Vec<Root>> {
        self.roots.get(provider_id).cloned()
    }
}

// ─── ScriptedModel ──────────────────────────────────────────────────────────

/// One scripted round: either a sequence of events or an open failure.
pub enum Round {
    Events(Vec<Result<StreamEvent, InferenceError>>),
    Fail(InferenceError),
}

/// A recorded `complete_stream` call.
#[derive(Debug, Clone)]
pub struct StreamCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Model backend that replays scripted rounds in order.
#[derive(Default)]
pub struct ScriptedModel {
    rounds: Mutex<VecDeque<Round>>,
    pub stream_calls: Mutex<Vec<StreamCall>>,
    pub once_reply: Option<String>,
}

impl ScriptedModel {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<StreamCall> {
        self.stream_calls.lock().unwrap().clone()
    }
}

/// Text round: each string becomes a delta, then `End`.
pub fn text_round(parts: &[&str]) -> Round {
    let mut events: Vec<_> = parts
        .iter()
        .map(|p| Ok(StreamEvent::TextDelta((*p).to_string())))
        .collect();
    events.push(Ok(StreamEvent::End));
    Round::Events(events)
}

/// A tool call fragment event.
pub fn call_delta(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> Result<StreamEvent, InferenceError> {
    Ok(StreamEvent::ToolCallDelta {
        index,
        id: id.map(String::from),
        name: name.map(String::from),
        arguments: args.map(String::from),
    })
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    async fn complete_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> Result<EventStream, InferenceError> {
        self.stream_calls.lock().unwrap().push(StreamCall {
            model: model.into(),
            messages,
            tools: tools.to_vec(),
        });
        let round = self.rounds.lock().unwrap().pop_front();
        match round {
            Some(Round::Events(events)) => Ok(Box::pin(stream::iter(events))),
            Some(Round::Fail(e)) => Err(e),
            None => Err(InferenceError::StreamError {
                reason: "script exhausted".into(),
            }),
        }
    }

    async fn complete_once(
        &self,
        _model: &str,
        _messages: Vec<ChatMessage>,
    ) -> Result<Completion, InferenceError> {
        Ok(Completion {
            text: self.once_reply.clone().unwrap_or_default(),
            usage: None,
        })
    }
}
