//! Shared types for the agent core.
//!
//! Chats, stored messages, and attachment descriptors used across the
//! ChatStore, the orchestrator, and the export/import layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub use crate::inference::types::Role;

// ─── Chats ──────────────────────────────────────────────────────────────────

/// A conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Assigned monotonically by the store, never reused.
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Refreshed whenever a message is appended or the chat is renamed.
    pub updated_at: DateTime<Utc>,
}

/// A chat plus its message count, as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub message_count: usize,
}

// ─── Messages ───────────────────────────────────────────────────────────────

/// A message as persisted in the store. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub chat_id: i64,
    pub role: Role,
    pub content: String,
    #[serde(default, deserialize_with = "deserialize_attachments")]
    pub attachments: Option<Vec<Attachment>>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Attachments as a slice (empty when none were stored).
    pub fn attachments(&self) -> &[Attachment] {
        self.attachments.as_deref().unwrap_or_default()
    }
}

/// Accept attachments stored either as an array or as a JSON-encoded string
/// (the format older stores wrote).
pub(crate) fn deserialize_attachments<'de, D>(deserializer: D) -> Result<Option<Vec<Attachment>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        List(Vec<Attachment>),
        Encoded(String),
    }

    match Option::<Stored>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Stored::List(list)) => Ok(Some(list)),
        Some(Stored::Encoded(raw)) if raw.trim().is_empty() => Ok(None),
        Some(Stored::Encoded(raw)) => serde_json::from_str::<Vec<Attachment>>(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

// ─── Attachments ────────────────────────────────────────────────────────────

/// What kind of file an attachment is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Pdf,
    Docx,
    Text,
    Unsupported,
}

/// A file attached to a user message.
///
/// Images carry base64 `data`; documents carry `extracted_text`. When
/// ingestion fails, `error` is set instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Attachment {
    /// A bare descriptor with only the identifying fields set.
    pub fn new(name: impl Into<String>, size: u64, kind: AttachmentKind) -> Self {
        Self {
            name: name.into(),
            size,
            kind,
            data: None,
            mime_type: None,
            extracted_text: None,
            ext: None,
            page_count: None,
            error: None,
            message: None,
        }
    }
}

// ─── Export ─────────────────────────────────────────────────────────────────

/// A rendered chat export, ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatExport {
    pub filename: String,
    pub mime_type: String,
    pub content: String,
}

// ─── Tests ──────────────────────────────────────────────────────────────────
