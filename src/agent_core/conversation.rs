//! Conversation assembly: stored history to provider messages.
//!
//! Responsibilities:
//! - Format stored messages (with attachments) for the target model
//! - Inject project files read through the filesystem provider as a
//!   leading system message

use crate::inference::messages::format_messages;
use crate::inference::types::{ChatMessage, Role};
use crate::mcp_client::{Root, ToolHost};

use super::database::Settings;
use super::types::StoredMessage;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Provider whose resources back context injection.
pub const FILESYSTEM_PROVIDER: &str = "filesystem";

/// Maximum characters kept per injected file.
pub const CONTEXT_FILE_CHAR_LIMIT: usize = 6000;

/// Header of the injected system message.
const CONTEXT_HEADER: &str = "You have access to the following project files:\n";

// ─── History ────────────────────────────────────────────────────────────────

/// Provider-ready messages for a turn: the optional context system message,
/// then the formatted history.
pub async fn assemble_history(
    host: &dyn ToolHost,
    history: &[StoredMessage],
    model: &str,
    context_files: &[String],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if let Some(context) = build_filesystem_context(host, context_files).await {
        messages.push(ChatMessage::text(Role::System, context));
    }
    messages.extend(format_messages(history, model));
    messages
}

/// `settings.context_files` as a list of paths.
pub fn context_files_from_settings(settings: &Settings) -> Vec<String> {
    settings
        .get("context_files")
        .and_then(|v| v.as_array())
        .map(|files| {
            files
                .iter()
                .filter_map(|f| f.as_str())
                .filter(|f| !f.trim().is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

// ─── Filesystem context ─────────────────────────────────────────────────────

/// Read each context file through the filesystem provider. `None` when the
/// provider is not connected, has no root, or nothing could be read.
pub async fn build_filesystem_context(host: &dyn ToolHost, files: &[String]) -> Option<String> {
    if files.is_empty() {
        return None;
    }
    let roots = host.roots(FILESYSTEM_PROVIDER).await?;
    let Some(root) = filesystem_root(&roots) else {
        tracing::warn!("filesystem provider has no roots, no context injected");
        return None;
    };

    let mut context = String::new();
    for path in files {
        match read_context_file(host, &root, path).await {
            Ok(text) => {
                let truncated: String = text.chars().take(CONTEXT_FILE_CHAR_LIMIT).collect();
                context.push_str(&format!("\n\n### {path}\n{truncated}"));
            }
            Err(reason) => tracing::warn!(path = %path, reason = %reason, "failed to load context file"),
        }
    }

    if context.is_empty() {
        tracing::warn!("no filesystem context injected");
        return None;
    }
    Some(format!("{CONTEXT_HEADER}{context}"))
}

async fn read_context_file(host: &dyn ToolHost, root: &str, path: &str) -> Result<String, String> {
    let uri = format!("file://{root}/{}", sanitize_context_path(path));
    let result = host
        .read_resource(FILESYSTEM_PROVIDER, &uri)
        .await
        .map_err(|e| e.to_string())?;
    result
        .pointer("/contents/0/text")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .ok_or_else(|| format!("no text content at {uri}"))
}

/// The first root as a bare path with forward slashes.
pub fn filesystem_root(roots: &[Root]) -> Option<String> {
    let first = roots.first()?;
    let path = first.uri.replacen("file://", "", 1).replace('\\', "/");
    Some(path.trim_end_matches('/').to_string())
}

/// Normalize separators, drop leading slashes, and strip `..` so a path
/// cannot climb out of the root.
pub fn sanitize_context_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches('/')
        .replace("..", "")
}

// ─── Tests ──────────────────────────────────────────────────────────────────
