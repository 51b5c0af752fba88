//! Transcript export and import.
//!
//! Export renders a chat as `json`, `markdown`, `txt`, or a ChatGPT-style
//! `mapping` document. Import accepts any of the JSON shapes back, and
//! anything else as a single user message.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::database::ChatStore;
use super::errors::AgentError;
use super::types::{deserialize_attachments, Attachment, Chat, ChatExport, Role, StoredMessage};

/// Title used when an import carries none.
pub const IMPORTED_CHAT_TITLE: &str = "Imported Chat";

const ASSISTANT_LABEL: &str = "DataBrain AI";

// ─── Formats ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Txt,
    ChatGpt,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "txt" | "text" => Ok(ExportFormat::Txt),
            "chatgpt" => Ok(ExportFormat::ChatGpt),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

// ─── Export ─────────────────────────────────────────────────────────────────

/// Export a stored chat.
pub fn export_chat(
    store: &ChatStore,
    chat_id: i64,
    format: ExportFormat,
) -> Result<ChatExport, AgentError> {
    let chat = store
        .get_chat(chat_id)
        .ok_or(AgentError::ChatNotFound { chat_id })?;
    let messages = store.list_messages(chat_id);
    render_export(&chat, &messages, format)
}

/// Render a chat and its messages in `format`.
pub fn render_export(
    chat: &Chat,
    messages: &[StoredMessage],
    format: ExportFormat,
) -> Result<ChatExport, AgentError> {
    let base = sanitize_filename(&chat.title);
    let export = match format {
        ExportFormat::Json => ChatExport {
            filename: format!("{base}.json"),
            mime_type: "application/json".into(),
            content: render_json(chat, messages)?,
        },
        ExportFormat::Markdown => ChatExport {
            filename: format!("{base}.md"),
            mime_type: "text/markdown".into(),
            content: render_markdown(chat, messages),
        },
        ExportFormat::Txt => ChatExport {
            filename: format!("{base}.txt"),
            mime_type: "text/plain".into(),
            content: render_txt(chat, messages),
        },
        ExportFormat::ChatGpt => ChatExport {
            filename: format!("{base}_chatgpt.json"),
            mime_type: "application/json".into(),
            content: render_chatgpt(chat, messages)?,
        },
    };
    tracing::info!(chat_id = chat.id, filename = %export.filename, "chat exported");
    Ok(export)
}

#[derive(Serialize)]
struct JsonExport<'a> {
    title: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    messages: Vec<JsonExportMessage<'a>>,
}

#[derive(Serialize)]
struct JsonExportMessage<'a> {
    role: Role,
    content: &'a str,
    created_at: DateTime<Utc>,
    attachments: Option<&'a [Attachment]>,
}

fn render_json(chat: &Chat, messages: &[StoredMessage]) -> Result<String, AgentError> {
    let doc = JsonExport {
        title: &chat.title,
        created_at: chat.created_at,
        updated_at: chat.updated_at,
        messages: messages
            .iter()
            .map(|m| JsonExportMessage {
                role: m.role,
                content: &m.content,
                created_at: m.created_at,
                attachments: m.attachments.as_deref(),
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

fn render_markdown(chat: &Chat, messages: &[StoredMessage]) -> String {
    let mut out = format!("# {}\n\n", chat.title);
    out.push_str(&format!("Created: {}\n\n", display_time(chat.created_at)));
    out.push_str("---\n\n");
    for msg in messages {
        let label = if msg.role == Role::User {
            "**You**".to_string()
        } else {
            format!("**{ASSISTANT_LABEL}**")
        };
        out.push_str(&format!("### {label}\n\n{}\n\n", msg.content));
        if !msg.attachments().is_empty() {
            for att in msg.attachments() {
                out.push_str(&format!("📎 Attachment: {}\n", att.name));
            }
            out.push('\n');
        }
    }
    out
}

fn render_txt(chat: &Chat, messages: &[StoredMessage]) -> String {
    let mut out = format!("{}\n", chat.title);
    out.push_str(&format!("{}\n\n", "=".repeat(chat.title.chars().count())));
    out.push_str(&format!("Created: {}\n\n", display_time(chat.created_at)));
    for msg in messages {
        let label = if msg.role == Role::User { "You" } else { ASSISTANT_LABEL };
        out.push_str(&format!("{label}:\n{}\n\n", msg.content));
        out.push_str(&format!("{}\n\n", "-".repeat(50)));
    }
    out
}

fn render_chatgpt(chat: &Chat, messages: &[StoredMessage]) -> Result<String, AgentError> {
    let mut mapping = serde_json::Map::new();
    let last = messages.len().saturating_sub(1);
    for (idx, msg) in messages.iter().enumerate() {
        let id = format!("msg_{idx}");
        let parent = (idx > 0).then(|| format!("msg_{}", idx - 1));
        let children: Vec<String> = if idx < last {
            vec![format!("msg_{}", idx + 1)]
        } else {
            Vec::new()
        };
        mapping.insert(
            id.clone(),
            serde_json::json!({
                "id": id,
                "message": {
                    "id": id,
                    "author": {"role": msg.role},
                    "content": {"content_type": "text", "parts": [msg.content]},
                    "create_time": unix_seconds(msg.created_at),
                },
                "parent": parent,
                "children": children,
            }),
        );
    }

    let doc = serde_json::json!({
        "title": chat.title,
        "create_time": unix_seconds(chat.created_at),
        "update_time": unix_seconds(chat.updated_at),
        "mapping": mapping,
    });
    Ok(serde_json::to_string_pretty(&doc)?)
}

fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

fn display_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Non-alphanumerics become `_`, runs collapse, capped at 50 chars.
pub fn sanitize_filename(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        let ch = if ch.is_ascii_alphanumeric() { ch } else { '_' };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    let capped: String = out.chars().take(50).collect();
    if capped.is_empty() {
        "chat".to_string()
    } else {
        capped
    }
}

// ─── Import ─────────────────────────────────────────────────────────────────

/// A parsed transcript, ready to be written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedChat {
    pub title: String,
    pub messages: Vec<ImportedMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedMessage {
    pub role: Role,
    pub content: String,
    pub attachments: Option<Vec<Attachment>>,
}

/// Parse and store a transcript. Returns the new chat id.
pub fn import_chat(store: &ChatStore, filename: &str, content: &str) -> Result<i64, AgentError> {
    let imported = parse_import(filename, content);
    let chat_id = store.create_chat(Some(&imported.title));
    for msg in &imported.messages {
        store.append_message(chat_id, msg.role, &msg.content, msg.attachments.clone())?;
    }
    tracing::info!(
        chat_id,
        title = %imported.title,
        message_count = imported.messages.len(),
        "chat imported"
    );
    Ok(chat_id)
}

/// Detect the transcript shape and parse it. Never fails: anything that is
/// not a recognized JSON transcript imports as plain text.
pub fn parse_import(filename: &str, content: &str) -> ImportedChat {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
        if value.get("mapping").is_some_and(|m| m.is_object()) {
            return parse_chatgpt(&value);
        }
        if let Ok(doc) = serde_json::from_value::<StructuredImport>(value) {
            return ImportedChat {
                title: non_empty_title(doc.title),
                messages: doc
                    .messages
                    .into_iter()
                    .map(|m| ImportedMessage {
                        role: import_role(&m.role),
                        content: m.content.unwrap_or_default(),
                        attachments: m.attachments,
                    })
                    .collect(),
            };
        }
    }

    ImportedChat {
        title: plain_text_title(filename),
        messages: vec![ImportedMessage {
            role: Role::User,
            content: content.to_string(),
            attachments: None,
        }],
    }
}

#[derive(Deserialize)]
struct StructuredImport {
    #[serde(default)]
    title: Option<String>,
    messages: Vec<StructuredMessage>,
}

#[derive(Deserialize)]
struct StructuredMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "deserialize_attachments")]
    attachments: Option<Vec<Attachment>>,
}

fn import_role(role: &str) -> Role {
    match role {
        "user" => Role::User,
        "system" => Role::System,
        "tool" => Role::Tool,
        _ => Role::Assistant,
    }
}

fn non_empty_title(title: Option<String>) -> String {
    title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| IMPORTED_CHAT_TITLE.to_string())
}

fn plain_text_title(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let stem = name
        .strip_suffix(".txt")
        .or_else(|| name.strip_suffix(".md"))
        .unwrap_or(name);
    non_empty_title(Some(stem.to_string()))
}

/// Walk a ChatGPT `mapping` from its roots along the children links.
/// Roots and sibling branches are visited in `create_time` order.
fn parse_chatgpt(doc: &serde_json::Value) -> ImportedChat {
    let title = non_empty_title(doc.get("title").and_then(|t| t.as_str()).map(String::from));
    let Some(mapping) = doc.get("mapping").and_then(|m| m.as_object()) else {
        return ImportedChat {
            title,
            messages: Vec::new(),
        };
    };

    let create_time = |id: &str| -> f64 {
        mapping
            .get(id)
            .and_then(|node| node.pointer("/message/create_time"))
            .and_then(|t| t.as_f64())
            .unwrap_or(0.0)
    };
    let by_time = |ids: &mut Vec<String>| {
        ids.sort_by(|a, b| {
            create_time(a)
                .partial_cmp(&create_time(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        })
    };

    let children: HashMap<&str, Vec<String>> = mapping
        .iter()
        .map(|(id, node)| {
            let kids = node
                .get("children")
                .and_then(|c| c.as_array())
                .map(|c| {
                    c.iter()
                        .filter_map(|k| k.as_str())
                        .filter(|k| mapping.contains_key(*k))
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            (id.as_str(), kids)
        })
        .collect();

    let mut roots: Vec<String> = mapping
        .iter()
        .filter(|(_, node)| {
            node.get("parent")
                .and_then(|p| p.as_str())
                .map_or(true, |p| !mapping.contains_key(p))
        })
        .map(|(id, _)| id.clone())
        .collect();
    by_time(&mut roots);

    let mut messages = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    for root in roots {
        let mut current = Some(root);
        while let Some(id) = current.take() {
            if !visited.insert(id.clone()) {
                break;
            }
            if let Some(msg) = mapping.get(&id).and_then(|n| n.get("message")).and_then(chatgpt_message) {
                messages.push(msg);
            }
            let mut next = children.get(id.as_str()).cloned().unwrap_or_default();
            by_time(&mut next);
            current = next.into_iter().find(|k| !visited.contains(k));
        }
    }

    ImportedChat { title, messages }
}

fn chatgpt_message(message: &serde_json::Value) -> Option<ImportedMessage> {
    let content = message
        .pointer("/content/parts/0")
        .and_then(|p| p.as_str())
        .filter(|p| !p.is_empty())?;
    let role = message
        .pointer("/author/role")
        .and_then(|r| r.as_str())
        .unwrap_or("assistant");
    Some(ImportedMessage {
        role: if role == "user" { Role::User } else { Role::Assistant },
        content: content.to_string(),
        attachments: None,
    })
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

    fn seeded(store: &ChatStore) -> i64 {
        let id = store.create_chat(Some("Trip: Paris & Rome!"));
        let mut att = Attachment::new("itinerary.txt", 4, AttachmentKind::Text);
        att.extracted_text = Some("day1".into());
        store
            .append_message(id, Role::User, "Plan my trip", Some(vec![att]))
            .unwrap();
        store
            .append_message(id, Role::Assistant, "Day 1: Louvre", None)
            .unwrap();
        store.append_message(id, Role::User, "Thanks", None).unwrap();
        id
    }

    fn pairs(messages: &[ImportedMessage]) -> Vec<(Role, String)> {
        messages.iter().map(|m| (m.role, m.content.clone())).collect()
    }

    fn stored_pairs(store: &ChatStore, chat_id: i64) -> Vec<(Role, String)> {
        store
            .list_messages(chat_id)
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Trip: Paris & Rome!"), "Trip_Paris_Rome_");
        assert_eq!(sanitize_filename(&"a".repeat(80)).len(), 50);
        assert_eq!(sanitize_filename(""), "chat");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("md".parse::<ExportFormat>(), Ok(ExportFormat::Markdown));
        assert_eq!("ChatGPT".parse::<ExportFormat>(), Ok(ExportFormat::ChatGpt));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let (_dir, store) = test_store();
        let id = seeded(&store);
        let export = export_chat(&store, id, ExportFormat::Json).unwrap();
        assert_eq!(export.filename, "Trip_Paris_Rome_.json");
        assert_eq!(export.mime_type, "application/json");

        let new_id = import_chat(&store, &export.filename, &export.content).unwrap();
        assert_ne!(new_id, id);
        assert_eq!(stored_pairs(&store, new_id), stored_pairs(&store, id));
        assert_eq!(store.get_chat(new_id).unwrap().title, "Trip: Paris & Rome!");
        assert_eq!(store.list_messages(new_id)[0].attachments()[0].name, "itinerary.txt");
    }

    #[test]
    fn test_chatgpt_round_trip() {
        let (_dir, store) = test_store();
        let id = seeded(&store);
        let export = export_chat(&store, id, ExportFormat::ChatGpt).unwrap();
        assert_eq!(export.filename, "Trip_Paris_Rome__chatgpt.json");

        let doc: serde_json::Value = serde_json::from_str(&export.content).unwrap();
        assert_eq!(doc["mapping"]["msg_0"]["parent"], serde_json::Value::Null);
        assert_eq!(doc["mapping"]["msg_1"]["children"], serde_json::json!(["msg_2"]));
        assert_eq!(doc["mapping"]["msg_2"]["message"]["author"]["role"], "user");

        let imported = parse_import(&export.filename, &export.content);
        assert_eq!(pairs(&imported.messages), stored_pairs(&store, id));
    }

    #[test]
    fn test_chatgpt_chain_beats_key_order() {
        // Keys sort as a, b, c but the chain is c -> a -> b
        let doc = serde_json::json!({
            "title": "Chain",
            "mapping": {
                "root": {"id": "root", "message": null, "parent": null, "children": ["c"]},
                "a": {"id": "a", "parent": "c", "children": ["b"],
                      "message": {"author": {"role": "assistant"}, "content": {"parts": ["second"]}, "create_time": 5.0}},
                "b": {"id": "b", "parent": "a", "children": [],
                      "message": {"author": {"role": "user"}, "content": {"parts": ["third"]}, "create_time": 1.0}},
                "c": {"id": "c", "parent": "root", "children": ["a"],
                      "message": {"author": {"role": "user"}, "content": {"parts": ["first"]}, "create_time": 9.0}}
            }
        });
        let imported = parse_import("x.json", &doc.to_string());
        assert_eq!(
            pairs(&imported.messages),
            vec![
                (Role::User, "first".to_string()),
                (Role::Assistant, "second".to_string()),
                (Role::User, "third".to_string()),
            ]
        );
    }

    #[test]
    fn test_chatgpt_roles_and_empty_parts() {
        let doc = serde_json::json!({
            "mapping": {
                "s": {"parent": null, "children": ["t"],
                      "message": {"author": {"role": "system"}, "content": {"parts": [""]}, "create_time": 0}},
                "t": {"parent": "s", "children": [],
                      "message": {"author": {"role": "tool"}, "content": {"parts": ["result"]}, "create_time": 1}}
            }
        });
        let imported = parse_import("x.json", &doc.to_string());
        assert_eq!(imported.title, IMPORTED_CHAT_TITLE);
        assert_eq!(pairs(&imported.messages), vec![(Role::Assistant, "result".to_string())]);
    }

    #[test]
    fn test_plain_text_import() {
        let imported = parse_import("notes/meeting.md", "# Agenda\n- budget");
        assert_eq!(imported.title, "meeting");
        assert_eq!(
            pairs(&imported.messages),
            vec![(Role::User, "# Agenda\n- budget".to_string())]
        );

        let imported = parse_import(".txt", "hello");
        assert_eq!(imported.title, IMPORTED_CHAT_TITLE);
    }

    #[test]
    fn test_json_without_messages_imports_as_text() {
        let imported = parse_import("data.json", r#"{"foo": 1}"#);
        assert_eq!(imported.title, "data.json");
        assert_eq!(imported.messages.len(), 1);
    }

    #[test]
    fn test_markdown_layout() {
        let (_dir, store) = test_store();
        let id = seeded(&store);
        let export = export_chat(&store, id, ExportFormat::Markdown).unwrap();
        assert_eq!(export.filename, "Trip_Paris_Rome_.md");
        let md = export.content;
        assert!(md.starts_with("# Trip: Paris & Rome!\n\nCreated: "));
        assert!(md.contains("---\n\n### **You**\n\nPlan my trip\n\n📎 Attachment: itinerary.txt\n\n"));
        assert!(md.contains("### **DataBrain AI**\n\nDay 1: Louvre\n\n"));
    }

    #[test]
    fn test_txt_layout() {
        let (_dir, store) = test_store();
        let id = store.create_chat(Some("Notes"));
        store.append_message(id, Role::User, "hi", None).unwrap();
        store.append_message(id, Role::Assistant, "hello", None).unwrap();

        let txt = export_chat(&store, id, ExportFormat::Txt).unwrap().content;
        let divider = "-".repeat(50);
        assert!(txt.starts_with("Notes\n=====\n\nCreated: "));
        assert!(txt.ends_with(&format!(
            "You:\nhi\n\n{divider}\n\nDataBrain AI:\nhello\n\n{divider}\n\n"
        )));
    }

    #[test]
    fn test_export_missing_chat() {
        let (_dir, store) = test_store();
        assert!(matches!(
            export_chat(&store, 9, ExportFormat::Json),
            Err(AgentError::ChatNotFound { chat_id: 9 })
        ));
    }
}
