//! Provider-ready message formatting and model capability checks.
//!
//! Attachments are expanded in their stored order: extracted text is
//! appended to the message body, images become `image_url` parts when the
//! model can see them, and otherwise degrade to a textual note.

use crate::agent_core::types::{AttachmentKind, StoredMessage};

use super::types::{ChatMessage, ContentPart, ImageUrl, MessageContent};

/// Model-name fragments known to support OpenAI-style function calling,
/// beyond the GPT families.
const EXTRA_FUNCTION_CALLING_FAMILIES: &[&str] = &[
    "claude-3",
    "gemini-1.5",
    "gemini-2",
    "deepseek-chat",
    "llama-3.1",
    "llama-3.3",
];

/// Whether the model accepts image input.
pub fn supports_vision(model: &str) -> bool {
    model.contains("gpt-4") && (model.contains("vision") || model.contains("gpt-4o"))
}

/// Whether the model accepts a `tools` array.
pub fn supports_function_calling(model: &str) -> bool {
    model.contains("gpt-4")
        || model.contains("gpt-3.5-turbo")
        || EXTRA_FUNCTION_CALLING_FAMILIES
            .iter()
            .any(|family| model.contains(family))
}

/// Convert stored history into provider messages for `model`.
pub fn format_messages(messages: &[StoredMessage], model: &str) -> Vec<ChatMessage> {
    let vision = supports_vision(model);
    messages
        .iter()
        .map(|msg| ChatMessage {
            role: msg.role,
            content: expand_attachments(msg, vision),
            tool_call_id: None,
            tool_calls: None,
        })
        .collect()
}

fn expand_attachments(msg: &StoredMessage, vision: bool) -> MessageContent {
    let mut text = msg.content.clone();
    let mut images = Vec::new();

    for att in msg.attachments() {
        let is_image = att.kind == AttachmentKind::Image;
        if is_image && vision {
            if let Some(data) = &att.data {
                let mime = att.mime_type.as_deref().unwrap_or("image/jpeg");
                images.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{mime};base64,{data}"),
                        detail: Some("high".to_string()),
                    },
                });
            }
        } else if let Some(extracted) = &att.extracted_text {
            text.push_str(&format!("\n\n[File: {}]\n{}", att.name, extracted));
        } else if is_image {
            text.push_str(&format!(
                "\n\n[Note: Image \"{}\" was attached but this model doesn't support image analysis. \
                 Please use GPT-4o or GPT-4o Mini for image analysis.]",
                att.name
            ));
        }
    }

    if images.is_empty() {
        MessageContent::Text(text)
    } else {
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text { text });
        parts.extend(images);
        MessageContent::Parts(parts)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
