//! Commands for chat management: the sidebar list, message history,
//! export and import.

use std::str::FromStr;

use crate::agent_core::export::{self, ExportFormat};
use crate::agent_core::types::Role;
use crate::agent_core::{Attachment, Chat, ChatExport, ChatSummary, StoredMessage};
use crate::AppState;

// ─── Chats ──────────────────────────────────────────────────────────────────

/// Create a chat and return its id.
pub fn create_chat(state: &AppState, title: Option<&str>) -> i64 {
    state.store.create_chat(title)
}

/// All chats, most recently updated first.
pub fn list_chats(state: &AppState) -> Vec<ChatSummary> {
    state.store.list_chats()
}

pub fn get_chat(state: &AppState, chat_id: i64) -> Result<Chat, String> {
    state
        .store
        .get_chat(chat_id)
        .ok_or_else(|| format!("chat not found: {chat_id}"))
}

/// Delete a chat and all of its messages.
pub fn delete_chat(state: &AppState, chat_id: i64) -> Result<(), String> {
    if state.busy.is_busy(chat_id) {
        return Err(format!("chat {chat_id} has a turn in progress"));
    }
    state.store.delete_chat(chat_id);
    Ok(())
}

pub fn rename_chat(state: &AppState, chat_id: i64, title: &str) -> Result<(), String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("title must not be empty".to_string());
    }
    get_chat(state, chat_id)?;
    state.store.rename_chat(chat_id, title);
    Ok(())
}

/// Reset the store to empty, settings included.
pub fn clear_all_data(state: &AppState) {
    state.store.clear_all();
    tracing::warn!("all chats cleared");
}

// ─── Messages ───────────────────────────────────────────────────────────────

/// Messages of a chat in append order.
pub fn get_messages(state: &AppState, chat_id: i64) -> Result<Vec<StoredMessage>, String> {
    get_chat(state, chat_id)?;
    Ok(state.store.list_messages(chat_id))
}

/// Append a message directly, outside any turn.
pub fn add_message(
    state: &AppState,
    chat_id: i64,
    role: &str,
    content: &str,
    attachments: Option<Vec<Attachment>>,
) -> Result<i64, String> {
    let role = parse_role(role)?;
    state
        .store
        .append_message(chat_id, role, content, attachments)
        .map_err(|e| e.to_string())
}

fn parse_role(role: &str) -> Result<Role, String> {
    match role.trim().to_ascii_lowercase().as_str() {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "system" => Ok(Role::System),
        other => Err(format!("unsupported message role '{other}'")),
    }
}

// ─── Export / import ────────────────────────────────────────────────────────

/// Export a chat as `json`, `markdown`, `txt` or `chatgpt`.
pub fn export_chat(state: &AppState, chat_id: i64, format: &str) -> Result<ChatExport, String> {
    let format = ExportFormat::from_str(format)?;
    let exported = export::export_chat(&state.store, chat_id, format).map_err(|e| e.to_string())?;
    tracing::info!(chat_id, format = ?format, filename = %exported.filename, "chat exported");
    Ok(exported)
}

/// Import a transcript and return the new chat's id.
pub fn import_chat(state: &AppState, filename: &str, content: &str) -> Result<i64, String> {
    let chat_id = export::import_chat(&state.store, filename, content).map_err(|e| e.to_string())?;
    tracing::info!(chat_id, filename, "chat imported");
    Ok(chat_id)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (AppState::open(dir.path()), dir)
    }

    #[test]
    fn test_chat_crud() {
        let (state, _dir) = state();
        let id = create_chat(&state, Some("Plans"));
        assert_eq!(get_chat(&state, id).unwrap().title, "Plans");

        rename_chat(&state, id, "  Roadmap ").unwrap();
        assert_eq!(get_chat(&state, id).unwrap().title, "Roadmap");
        assert!(rename_chat(&state, id, "").is_err());
        assert!(rename_chat(&state, 99, "x").is_err());

        add_message(&state, id, "user", "hi", None).unwrap();
        assert_eq!(list_chats(&state)[0].message_count, 1);

        delete_chat(&state, id).unwrap();
        assert!(get_chat(&state, id).is_err());
        assert!(get_messages(&state, id).is_err());
    }

    #[test]
    fn test_delete_refused_while_busy() {
        let (state, _dir) = state();
        let id = create_chat(&state, None);
        let _guard = state.busy.try_acquire(id).unwrap();
        assert!(delete_chat(&state, id).is_err());
        assert!(get_chat(&state, id).is_ok());
    }

    #[test]
    fn test_add_message_validates_role() {
        let (state, _dir) = state();
        let id = create_chat(&state, None);
        assert!(add_message(&state, id, "tool", "x", None).is_err());
        assert!(add_message(&state, 77, "user", "x", None).is_err());
        add_message(&state, id, "Assistant", "ok", None).unwrap();
        assert_eq!(get_messages(&state, id).unwrap()[0].role, Role::Assistant);
    }

    #[test]
    fn test_export_import_through_commands() {
        let (state, _dir) = state();
        let id = create_chat(&state, Some("Trip"));
        add_message(&state, id, "user", "Where to?", None).unwrap();
        add_message(&state, id, "assistant", "Lisbon.", None).unwrap();

        let exported = export_chat(&state, id, "json").unwrap();
        assert!(export_chat(&state, id, "pdf").is_err());

        let imported = import_chat(&state, &exported.filename, &exported.content).unwrap();
        let pairs: Vec<_> = get_messages(&state, imported)
            .unwrap()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Role::User, "Where to?".to_string()),
                (Role::Assistant, "Lisbon.".to_string())
            ]
        );
    }

    #[test]
    fn test_clear_all_resets_everything() {
        let (state, _dir) = state();
        let old = create_chat(&state, None);
        crate::commands::settings::set_setting(&state, "ai_provider", "groq").unwrap();
        clear_all_data(&state);
        assert!(list_chats(&state).is_empty());
        assert!(state.store.get_settings().is_empty());
        assert!(create_chat(&state, None) > old);
        assert!(get_chat(&state, old).is_err());
    }
}
