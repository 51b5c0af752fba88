//! JSON-file Conversation Store for chats, messages, and settings.
//!
//! The whole store lives in one file (`databrain.json`) that is rewritten on
//! every mutation: write-through, via a temp file renamed over the original.
//! Persistence failures are logged and recorded, never returned; a corrupt
//! or unreadable file falls back to an empty store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::AgentError;
use super::types::{Attachment, Chat, ChatSummary, Role, StoredMessage};

/// Title given to chats created without one.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Free-form settings map, shallow-merged on save.
pub type Settings = serde_json::Map<String, serde_json::Value>;

// ─── On-disk shape ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreData {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    chats: Vec<Chat>,
    #[serde(default)]
    messages: Vec<StoredMessage>,
    #[serde(default = "first_id")]
    next_chat_id: i64,
    #[serde(default = "first_id")]
    next_message_id: i64,
}

fn first_id() -> i64 {
    1
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            settings: Settings::new(),
            chats: Vec::new(),
            messages: Vec::new(),
            next_chat_id: 1,
            next_message_id: 1,
        }
    }
}

impl StoreData {
    /// Never hand out an id at or below one already present.
    fn fix_up_ids(&mut self) {
        let max_chat = self.chats.iter().map(|c| c.id).max().unwrap_or(0);
        let max_msg = self.messages.iter().map(|m| m.id).max().unwrap_or(0);
        self.next_chat_id = self.next_chat_id.max(max_chat + 1);
        self.next_message_id = self.next_message_id.max(max_msg + 1);
    }

    fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        let chats = self.chats.iter().flat_map(|c| [c.created_at, c.updated_at]);
        let messages = self.messages.iter().map(|m| m.created_at);
        chats.chain(messages).max()
    }
}

struct Inner {
    data: StoreData,
    last_stamp: Option<DateTime<Utc>>,
    last_persist_error: Option<String>,
}

// ─── ChatStore ──────────────────────────────────────────────────────────────

/// File-backed store handle. Cheap to share behind an `Arc`.
pub struct ChatStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl ChatStore {
    /// Open (or create) the store at `path`.
    ///
    /// Never fails: a missing file starts empty, and a corrupt one is logged
    /// and replaced by an empty store on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = load(&path);
        let last_stamp = data.latest_timestamp();

        tracing::info!(
            path = %path.display(),
            chats = data.chats.len(),
            messages = data.messages.len(),
            "conversation store opened"
        );

        Self {
            path,
            inner: Mutex::new(Inner {
                data,
                last_stamp,
                last_persist_error: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The most recent persistence failure, cleared by the next good write.
    pub fn last_persist_error(&self) -> Option<String> {
        self.lock().last_persist_error.clone()
    }

    // ─── Settings ───────────────────────────────────────────────────────

    pub fn get_settings(&self) -> Settings {
        self.lock().data.settings.clone()
    }

    /// Shallow-merge `settings` into the stored settings.
    pub fn save_settings(&self, settings: Settings) {
        let mut inner = self.lock();
        inner.data.settings.extend(settings);
        self.persist(&mut inner);
    }

    // ─── Chats ──────────────────────────────────────────────────────────

    /// Create a chat and return its id.
    pub fn create_chat(&self, title: Option<&str>) -> i64 {
        let mut inner = self.lock();
        let now = next_stamp(&mut inner);
        let id = inner.data.next_chat_id;
        inner.data.next_chat_id += 1;

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CHAT_TITLE);
        inner.data.chats.push(Chat {
            id,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        });
        self.persist(&mut inner);

        tracing::debug!(chat_id = id, "chat created");
        id
    }

    /// All chats with message counts, most recently updated first.
    pub fn list_chats(&self) -> Vec<ChatSummary> {
        let inner = self.lock();
        let mut chats: Vec<ChatSummary> = inner
            .data
            .chats
            .iter()
            .map(|chat| ChatSummary {
                chat: chat.clone(),
                message_count: inner
                    .data
                    .messages
                    .iter()
                    .filter(|m| m.chat_id == chat.id)
                    .count(),
            })
            .collect();
        chats.sort_by(|a, b| {
            b.chat
                .updated_at
                .cmp(&a.chat.updated_at)
                .then(b.chat.id.cmp(&a.chat.id))
        });
        chats
    }

    pub fn get_chat(&self, chat_id: i64) -> Option<Chat> {
        self.lock().data.chats.iter().find(|c| c.id == chat_id).cloned()
    }

    /// Remove a chat and all of its messages. No error if it does not exist.
    pub fn delete_chat(&self, chat_id: i64) {
        let mut inner = self.lock();
        inner.data.chats.retain(|c| c.id != chat_id);
        inner.data.messages.retain(|m| m.chat_id != chat_id);
        self.persist(&mut inner);
        tracing::debug!(chat_id, "chat deleted");
    }

    /// Update a chat's title. No-op if the chat is missing.
    pub fn rename_chat(&self, chat_id: i64, title: &str) {
        let mut inner = self.lock();
        let now = next_stamp(&mut inner);
        let Some(chat) = inner.data.chats.iter_mut().find(|c| c.id == chat_id) else {
            return;
        };
        chat.title = title.to_string();
        chat.updated_at = now;
        self.persist(&mut inner);
    }

    // ─── Messages ───────────────────────────────────────────────────────

    /// Append a message and refresh the parent chat's `updated_at`.
    pub fn append_message(
        &self,
        chat_id: i64,
        role: Role,
        content: &str,
        attachments: Option<Vec<Attachment>>,
    ) -> Result<i64, AgentError> {
        let mut inner = self.lock();
        if !inner.data.chats.iter().any(|c| c.id == chat_id) {
            return Err(AgentError::ChatNotFound { chat_id });
        }

        let now = next_stamp(&mut inner);
        let id = inner.data.next_message_id;
        inner.data.next_message_id += 1;

        inner.data.messages.push(StoredMessage {
            id,
            chat_id,
            role,
            content: content.to_string(),
            attachments: attachments.filter(|a| !a.is_empty()),
            created_at: now,
        });
        if let Some(chat) = inner.data.chats.iter_mut().find(|c| c.id == chat_id) {
            chat.updated_at = now;
        }
        self.persist(&mut inner);

        Ok(id)
    }

    /// Messages of a chat in `created_at` order (append order).
    pub fn list_messages(&self, chat_id: i64) -> Vec<StoredMessage> {
        let inner = self.lock();
        let mut messages: Vec<StoredMessage> = inner
            .data
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        messages
    }

    /// Reset to an empty store. Id counters carry over so cleared ids are
    /// never handed out again.
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        let (next_chat_id, next_message_id) = (inner.data.next_chat_id, inner.data.next_message_id);
        inner.data = StoreData {
            next_chat_id,
            next_message_id,
            ..StoreData::default()
        };
        self.persist(&mut inner);
        tracing::info!("conversation store cleared");
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, inner: &mut Inner) {
        match write_atomic(&self.path, &inner.data) {
            Ok(()) => inner.last_persist_error = None,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to persist store");
                inner.last_persist_error = Some(e.to_string());
            }
        }
    }
}

/// A timestamp strictly after every one handed out so far.
fn next_stamp(inner: &mut Inner) -> DateTime<Utc> {
    let mut now = Utc::now();
    if let Some(last) = inner.last_stamp {
        if now <= last {
            now = last + Duration::microseconds(1);
        }
    }
    inner.last_stamp = Some(now);
    now
}

fn load(path: &Path) -> StoreData {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoreData::default(),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to read store, starting empty");
            return StoreData::default();
        }
    };

    match serde_json::from_str::<StoreData>(&raw) {
        Ok(mut data) => {
            data.fix_up_ids();
            data
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "corrupt store, starting empty");
            StoreData::default()
        }
    }
}

fn write_atomic(path: &Path, data: &StoreData) -> Result<(), AgentError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::AttachmentKind;

    fn test_store() -> (tempfile::TempDir, ChatStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatStore::open(dir.path().join("databrain.json"));
        (dir, store)
    }

    #[test]
    fn test_create_and_get_chat() {
        let (_dir, store) = test_store();
        let id = store.create_chat(None);
        let chat = store.get_chat(id).unwrap();
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);
        assert_eq!(chat.created_at, chat.updated_at);
        assert!(store.get_chat(id + 1).is_none());
    }

    #[test]
    fn test_ids_strictly_increase_across_deletes() {
        let (_dir, store) = test_store();
        let a = store.create_chat(Some("a"));
        let m1 = store.append_message(a, Role::User, "1", None).unwrap();
        store.delete_chat(a);
        let b = store.create_chat(Some("b"));
        let m2 = store.append_message(b, Role::User, "2", None).unwrap();
        assert!(b > a);
        assert!(m2 > m1);
    }

    #[test]
    fn test_ids_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("databrain.json");
        let first = {
            let store = ChatStore::open(&path);
            store.create_chat(Some("first"))
        };
        let store = ChatStore::open(&path);
        assert_eq!(store.get_chat(first).unwrap().title, "first");
        assert!(store.create_chat(None) > first);
    }

    #[test]
    fn test_cascade_delete() {
        let (_dir, store) = test_store();
        let keep = store.create_chat(Some("keep"));
        let gone = store.create_chat(Some("gone"));
        store.append_message(keep, Role::User, "k", None).unwrap();
        store.append_message(gone, Role::User, "g1", None).unwrap();
        store.append_message(gone, Role::Assistant, "g2", None).unwrap();

        store.delete_chat(gone);
        assert!(store.list_messages(gone).is_empty());
        assert!(store.list_chats().iter().all(|c| c.chat.id != gone));
        assert_eq!(store.list_messages(keep).len(), 1);

        // deleting again is fine
        store.delete_chat(gone);
    }

    #[test]
    fn test_messages_in_append_order() {
        let (_dir, store) = test_store();
        let chat = store.create_chat(None);
        for i in 0..20 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append_message(chat, role, &format!("m{i}"), None).unwrap();
        }
        let messages = store.list_messages(chat);
        let contents: Vec<_> = messages.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
        assert!(messages.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[test]
    fn test_append_to_missing_chat() {
        let (_dir, store) = test_store();
        let err = store.append_message(42, Role::User, "hi", None).unwrap_err();
        assert!(matches!(err, AgentError::ChatNotFound { chat_id: 42 }));
    }

    #[test]
    fn test_list_chats_sorted_by_activity_with_counts() {
        let (_dir, store) = test_store();
        let old = store.create_chat(Some("old"));
        let new = store.create_chat(Some("new"));
        store.append_message(old, Role::User, "bump", None).unwrap();

        let chats = store.list_chats();
        assert_eq!(chats[0].chat.id, old);
        assert_eq!(chats[0].message_count, 1);
        assert_eq!(chats[1].chat.id, new);
        assert_eq!(chats[1].message_count, 0);
    }

    #[test]
    fn test_rename_refreshes_updated_at() {
        let (_dir, store) = test_store();
        let id = store.create_chat(None);
        let before = store.get_chat(id).unwrap().updated_at;
        store.rename_chat(id, "Trip planning");
        let chat = store.get_chat(id).unwrap();
        assert_eq!(chat.title, "Trip planning");
        assert!(chat.updated_at > before);

        // missing chat is a no-op
        store.rename_chat(999, "nope");
        assert!(store.get_chat(999).is_none());
    }

    #[test]
    fn test_attachments_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("databrain.json");
        let store = ChatStore::open(&path);
        let chat = store.create_chat(None);
        let mut att = Attachment::new("notes.txt", 5, AttachmentKind::Text);
        att.extracted_text = Some("hello".into());
        store
            .append_message(chat, Role::User, "see file", Some(vec![att.clone()]))
            .unwrap();
        store.append_message(chat, Role::Assistant, "ok", Some(vec![])).unwrap();

        let reopened = ChatStore::open(&path);
        let messages = reopened.list_messages(chat);
        assert_eq!(messages[0].attachments(), &[att]);
        assert!(messages[1].attachments.is_none());
    }

    #[test]
    fn test_settings_shallow_merge() {
        let (_dir, store) = test_store();
        let mut first = Settings::new();
        first.insert("ai_provider".into(), "openai".into());
        first.insert("temperature".into(), serde_json::json!(0.5));
        store.save_settings(first);

        let mut second = Settings::new();
        second.insert("temperature".into(), serde_json::json!(0.9));
        store.save_settings(second);

        let settings = store.get_settings();
        assert_eq!(settings["ai_provider"], "openai");
        assert_eq!(settings["temperature"], 0.9);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("databrain.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = ChatStore::open(&path);
        assert!(store.list_chats().is_empty());
        assert_eq!(store.create_chat(None), 1);
        assert!(store.last_persist_error().is_none());
    }

    #[test]
    fn test_loads_legacy_file_with_string_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("databrain.json");
        let legacy = serde_json::json!({
            "settings": {"default_model": "gpt-4o"},
            "chats": [{"id": 3, "title": "Old", "created_at": "2025-01-01T00:00:00Z", "updated_at": "2025-01-01T00:00:00Z"}],
            "messages": [{
                "id": 7, "chat_id": 3, "role": "user", "content": "hi",
                "attachments": "[{\"name\":\"a.txt\",\"size\":1,\"type\":\"text\",\"extractedText\":\"a\"}]",
                "created_at": "2025-01-01T00:00:01Z"
            }],
            "nextChatId": 1,
            "nextMessageId": 1
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let store = ChatStore::open(&path);
        assert_eq!(store.list_messages(3)[0].attachments()[0].name, "a.txt");
        // next ids are fixed up past existing records
        assert_eq!(store.create_chat(None), 4);
        assert_eq!(store.append_message(3, Role::Assistant, "yo", None).unwrap(), 8);
    }

    #[test]
    fn test_persist_failure_is_recorded_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        // Parent "directory" is a regular file, so every write fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let store = ChatStore::open(blocker.join("databrain.json"));

        let id = store.create_chat(Some("in memory only"));
        assert_eq!(store.get_chat(id).unwrap().title, "in memory only");
        assert!(store.last_persist_error().is_some());
    }

    #[test]
    fn test_clear_all() {
        let (_dir, store) = test_store();
        let id = store.create_chat(None);
        store.append_message(id, Role::User, "x", None).unwrap();
        store.clear_all();
        assert!(store.list_chats().is_empty());
        assert!(store.get_settings().is_empty());

        let next = store.create_chat(None);
        assert!(next > id);
        assert!(store.append_message(next, Role::User, "y", None).unwrap() > 1);
    }
}
