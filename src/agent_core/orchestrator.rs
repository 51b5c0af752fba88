//! Streaming orchestrator: one user turn, from prompt to stored reply.
//!
//! A turn is a sequence of rounds. Each round opens a streamed completion,
//! forwards text deltas to the UI as they arrive, and folds tool-call
//! fragments into a [`ToolCallTable`]. When a round ends with calls pending,
//! the batch is dispatched, the assistant request and every tool result are
//! appended to the in-turn history, and the completion is reopened. A round
//! that ends without calls finishes the turn.
//!
//! Store ordering:
//! 1. The user message is persisted before the first completion opens
//! 2. The assistant message is persisted once, after the last round
//! 3. A failed turn writes no assistant message

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::StreamExt;

use crate::inference::catalog::{build_external_tool_catalog, exclude_providers, ToolCatalog};
use crate::inference::client::ModelBackend;
use crate::inference::types::{ChatMessage, StreamEvent};
use crate::mcp_client::ToolHost;

use super::conversation::{assemble_history, context_files_from_settings};
use super::database::{ChatStore, DEFAULT_CHAT_TITLE};
use super::errors::AgentError;
use super::events::{EventSink, UiEvent};
use super::tool_router::{dispatch_batch, ToolCallTable};
use super::types::{Attachment, Role};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Dispatch rounds allowed per turn. The round after the last one is opened
/// without tools so the model has to answer in text.
pub const MAX_TOOL_ROUNDS: usize = 8;

/// Pushed to the UI when a round hands off to tool dispatch.
pub const TOOLS_NOTICE: &str = "\n\n[Using MCP tools...]\n\n";

/// Words kept when a chat is titled after its first prompt.
const TITLE_WORDS: usize = 6;

// ─── Busy flag ──────────────────────────────────────────────────────────────

/// Chats with a turn in flight.
#[derive(Debug, Default)]
pub struct BusyChats {
    chats: Mutex<HashSet<i64>>,
}

impl BusyChats {
    /// Mark `chat_id` busy. `None` if a turn already holds it.
    pub fn try_acquire(self: &Arc<Self>, chat_id: i64) -> Option<BusyGuard> {
        let mut chats = self.chats.lock().unwrap_or_else(|p| p.into_inner());
        if !chats.insert(chat_id) {
            return None;
        }
        Some(BusyGuard {
            owner: Arc::clone(self),
            chat_id,
        })
    }

    pub fn is_busy(&self, chat_id: i64) -> bool {
        self.chats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&chat_id)
    }
}

/// Clears the busy flag on drop, whichever way the turn ends.
#[derive(Debug)]
pub struct BusyGuard {
    owner: Arc<BusyChats>,
    chat_id: i64,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.owner
            .chats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.chat_id);
    }
}

// ─── Titles ─────────────────────────────────────────────────────────────────

/// First six space-separated words of the prompt, with `...` when cut.
pub fn generate_chat_title(content: &str) -> String {
    let words: Vec<&str> = content.split(' ').filter(|w| !w.is_empty()).collect();
    if words.is_empty() {
        return DEFAULT_CHAT_TITLE.to_string();
    }
    let mut title = words[..words.len().min(TITLE_WORDS)].join(" ");
    if words.len() > TITLE_WORDS {
        title.push_str("...");
    }
    title
}

// ─── Turn ───────────────────────────────────────────────────────────────────

/// One user turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub chat_id: i64,
    pub content: String,
    pub attachments: Option<Vec<Attachment>>,
    /// Model override; the orchestrator default otherwise.
    pub model: Option<String>,
}

/// Drives turns against a tool host and a model backend.
pub struct TurnOrchestrator {
    store: Arc<ChatStore>,
    host: Arc<dyn ToolHost>,
    backend: Arc<dyn ModelBackend>,
    busy: Arc<BusyChats>,
    default_model: String,
    excluded_providers: Vec<String>,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<ChatStore>,
        host: Arc<dyn ToolHost>,
        backend: Arc<dyn ModelBackend>,
        busy: Arc<BusyChats>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            host,
            backend,
            busy,
            default_model: default_model.into(),
            excluded_providers: crate::inference::catalog::DEFAULT_EXCLUDED_PROVIDERS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Providers whose tools are never offered to the model.
    pub fn with_excluded_providers(mut self, providers: Vec<String>) -> Self {
        self.excluded_providers = providers;
        self
    }

    /// Run a turn to completion. Returns the final assistant text.
    ///
    /// Once the busy flag is taken, exactly one terminal event reaches
    /// `sink`: `StreamEnd` after the reply is stored, or `StreamError`.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        sink: &dyn EventSink,
    ) -> Result<String, AgentError> {
        let _guard = self
            .busy
            .try_acquire(request.chat_id)
            .ok_or(AgentError::TurnInProgress {
                chat_id: request.chat_id,
            })?;

        match self.drive(&request, sink).await {
            Ok(text) => {
                sink.emit(UiEvent::StreamEnd);
                Ok(text)
            }
            Err(e) => {
                tracing::error!(chat_id = request.chat_id, error = %e, "turn failed");
                sink.emit(UiEvent::StreamError(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive(&self, request: &TurnRequest, sink: &dyn EventSink) -> Result<String, AgentError> {
        let chat_id = request.chat_id;
        if self.store.get_chat(chat_id).is_none() {
            return Err(AgentError::ChatNotFound { chat_id });
        }
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        self.store
            .append_message(chat_id, Role::User, &request.content, request.attachments.clone())?;

        let history = self.store.list_messages(chat_id);
        let first_turn = history.len() == 1;
        let context_files = context_files_from_settings(&self.store.get_settings());
        let mut messages =
            assemble_history(self.host.as_ref(), &history, &model, &context_files).await;

        tracing::info!(
            chat_id,
            model = %model,
            history_len = history.len(),
            message_count = messages.len(),
            "=== TURN START ==="
        );

        let mut dispatch_rounds = 0usize;
        let final_text = loop {
            let tools_allowed = dispatch_rounds < MAX_TOOL_ROUNDS;
            let catalog = if tools_allowed {
                build_external_tool_catalog(
                    self.host.as_ref(),
                    exclude_providers(self.excluded_providers.clone()),
                )
                .await
            } else {
                tracing::warn!(chat_id, rounds = dispatch_rounds, "tool round cap reached, tools withheld");
                ToolCatalog::default()
            };

            tracing::info!(
                chat_id,
                round = dispatch_rounds + 1,
                message_count = messages.len(),
                tool_count = catalog.len(),
                "=== ROUND START ==="
            );

            let (text, table) = self
                .stream_round(&model, messages.clone(), &catalog, sink)
                .await?;

            if table.is_empty() {
                break text;
            }
            if !tools_allowed {
                tracing::warn!(
                    chat_id,
                    ignored_calls = table.len(),
                    "tool calls after round cap ignored"
                );
                break text;
            }

            sink.emit(UiEvent::StreamChunk(TOOLS_NOTICE.to_string()));
            let requests = table.into_requests();
            messages.push(ChatMessage::assistant_with_tools(text, requests.clone()));

            let outcomes = dispatch_batch(self.host.as_ref(), &catalog, &requests).await;
            for outcome in &outcomes {
                messages.push(ChatMessage::tool_result(outcome.call_id.clone(), outcome.content()));
            }
            dispatch_rounds += 1;
        };

        self.store
            .append_message(chat_id, Role::Assistant, &final_text, None)?;
        if first_turn {
            self.store
                .rename_chat(chat_id, &generate_chat_title(&request.content));
        }

        tracing::info!(
            chat_id,
            rounds = dispatch_rounds + 1,
            response_len = final_text.len(),
            "turn complete"
        );
        Ok(final_text)
    }

    /// Consume one streamed completion. Text goes to the UI as it arrives.
    async fn stream_round(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        catalog: &ToolCatalog,
        sink: &dyn EventSink,
    ) -> Result<(String, ToolCallTable), AgentError> {
        let mut stream = self
            .backend
            .complete_stream(model, messages, &catalog.definitions())
            .await?;

        let mut text = String::new();
        let mut table = ToolCallTable::default();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    sink.emit(UiEvent::StreamChunk(delta));
                }
                StreamEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                } => table.fold(index, id, name, arguments),
                StreamEvent::End => break,
            }
        }
        Ok((text, table))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
