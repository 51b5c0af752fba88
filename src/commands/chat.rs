//! Commands for the chat interface.
//!
//! They bridge the UI collaborator to the agent core: every turn resolves
//! the model gateway from current settings, then hands off to the
//! [`TurnOrchestrator`], which streams events into the caller's sink.

use std::sync::Arc;

use crate::agent_core::{Attachment, EventSink, Settings, TurnOrchestrator, TurnRequest, UiEvent};
use crate::inference::catalog::DEFAULT_EXCLUDED_PROVIDERS;
use crate::inference::types::Role;
use crate::inference::{ChatMessage, InferenceClient, ModelBackend};
use crate::mcp_client::ToolHost;
use crate::AppState;

/// Settings key listing providers whose tools the model never sees.
pub const EXCLUDED_PROVIDERS_KEY: &str = "excluded_providers";

/// Send a user turn. Text streams into `sink`; the final assistant text is
/// returned once it has been stored.
pub async fn send_turn(
    state: &AppState,
    chat_id: i64,
    content: &str,
    attachments: Option<Vec<Attachment>>,
    model: Option<String>,
    sink: &dyn EventSink,
) -> Result<String, String> {
    let backend = match state.gateway_config().and_then(InferenceClient::new) {
        Ok(client) => client,
        Err(e) => {
            let message = e.message();
            tracing::error!(chat_id, error = %message, "model gateway unavailable");
            sink.emit(UiEvent::StreamError(message.clone()));
            return Err(message);
        }
    };
    let default_model = backend.default_model().to_string();

    let request = TurnRequest {
        chat_id,
        content: content.to_string(),
        attachments: attachments.filter(|a| !a.is_empty()),
        model,
    };
    run_turn_with(state, Arc::new(backend), &default_model, request, sink).await
}

/// Run a turn against an explicit backend.
pub async fn run_turn_with(
    state: &AppState,
    backend: Arc<dyn ModelBackend>,
    default_model: &str,
    request: TurnRequest,
    sink: &dyn EventSink,
) -> Result<String, String> {
    let excluded = excluded_providers(&state.store.get_settings());
    let host: Arc<dyn ToolHost> = state.registry.clone();
    let orchestrator = TurnOrchestrator::new(
        Arc::clone(&state.store),
        host,
        backend,
        Arc::clone(&state.busy),
        default_model,
    )
    .with_excluded_providers(excluded);

    orchestrator
        .run_turn(request, sink)
        .await
        .map_err(|e| e.to_string())
}

/// Whether `chat_id` has a turn in flight.
pub fn is_busy(state: &AppState, chat_id: i64) -> bool {
    state.busy.is_busy(chat_id)
}

/// One-shot completion outside any chat: nothing is stored and no tools
/// are offered.
pub async fn ask_once(state: &AppState, prompt: &str, model: Option<String>) -> Result<String, String> {
    let client = state
        .gateway_config()
        .and_then(InferenceClient::new)
        .map_err(|e| e.message())?;
    let model = model.unwrap_or_else(|| client.default_model().to_string());
    ask_once_with(&client, &model, prompt).await
}

/// One-shot completion against an explicit backend.
pub async fn ask_once_with(
    backend: &dyn ModelBackend,
    model: &str,
    prompt: &str,
) -> Result<String, String> {
    let completion = backend
        .complete_once(model, vec![ChatMessage::text(Role::User, prompt)])
        .await
        .map_err(|e| e.message())?;
    if let Some(usage) = &completion.usage {
        tracing::info!(
            model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "one-shot completion"
        );
    }
    Ok(completion.text)
}

/// `settings.excluded_providers`, or the default exclusion list.
pub fn excluded_providers(settings: &Settings) -> Vec<String> {
    match settings.get(EXCLUDED_PROVIDERS_KEY).and_then(|v| v.as_array()) {
        Some(list) => list
            .iter()
            .filter_map(|p| p.as_str())
            .map(String::from)
            .collect(),
        None => DEFAULT_EXCLUDED_PROVIDERS
            .iter()
            .map(|p| p.to_string())
            .collect(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
