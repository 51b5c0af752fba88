//! Attachment ingestion: turn a file on disk into an [`Attachment`].
//!
//! Images are inlined as base64, documents are reduced to text. Extraction
//! failures produce a descriptor with `error` set rather than an `Err`, so
//! the user still sees the file in the message.

use std::io::{Cursor, Read};
use std::panic::AssertUnwindSafe;
use std::path::Path;

use base64::Engine as _;
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use zip::ZipArchive;

use super::errors::AgentError;
use super::types::{Attachment, AttachmentKind};

pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

pub const TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".js", ".py", ".java", ".cpp", ".c", ".php", ".html", ".css", ".json", ".xml",
    ".csv", ".sql",
];

pub const UNSUPPORTED_MESSAGE: &str = "File type not directly supported. Upload as reference only.";

const DOCX_DOCUMENT_XML: &str = "word/document.xml";

/// Read and ingest a file. Only a missing or unreadable file is an error.
pub fn ingest_file(path: &Path) -> Result<Attachment, AgentError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = std::fs::read(path).map_err(|e| AgentError::StoreIo {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let attachment = ingest_bytes(&name, &bytes);
    tracing::info!(
        file = %name,
        size = attachment.size,
        kind = ?attachment.kind,
        failed = attachment.error.is_some(),
        "attachment ingested"
    );
    Ok(attachment)
}

/// Ingest in-memory file contents, dispatching on the extension of `name`.
pub fn ingest_bytes(name: &str, bytes: &[u8]) -> Attachment {
    let ext = extension_of(name);
    let size = bytes.len() as u64;

    let mut att = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        let mut att = Attachment::new(name, size, AttachmentKind::Image);
        att.data = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        att.mime_type = Some(image_mime(&ext).to_string());
        att
    } else if ext == ".pdf" {
        let mut att = Attachment::new(name, size, AttachmentKind::Pdf);
        match extract_pdf(bytes) {
            Ok((text, pages)) => {
                att.extracted_text = Some(text);
                att.page_count = Some(pages);
            }
            Err(reason) => {
                tracing::warn!(file = %name, reason = %reason, "PDF parse error");
                att.error = Some("Failed to extract text from PDF".to_string());
            }
        }
        att
    } else if ext == ".docx" {
        let mut att = Attachment::new(name, size, AttachmentKind::Docx);
        match extract_docx(bytes) {
            Ok(text) => att.extracted_text = Some(text),
            Err(reason) => {
                tracing::warn!(file = %name, reason = %reason, "DOCX parse error");
                att.error = Some("Failed to extract text from DOCX".to_string());
            }
        }
        att
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        let mut att = Attachment::new(name, size, AttachmentKind::Text);
        match std::str::from_utf8(bytes) {
            Ok(text) => att.extracted_text = Some(text.to_string()),
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "text read error");
                att.error = Some("Failed to read text file".to_string());
            }
        }
        att
    } else {
        let mut att = Attachment::new(name, size, AttachmentKind::Unsupported);
        att.message = Some(UNSUPPORTED_MESSAGE.to_string());
        att
    };

    att.ext = Some(ext);
    att
}

/// Lowercased extension with its leading dot, or `""`.
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

fn image_mime(ext: &str) -> &'static str {
    match ext {
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        _ => "image/jpeg",
    }
}

// ─── PDF ────────────────────────────────────────────────────────────────────

/// Text and page count. `pdf-extract` does the text, with lopdf's own
/// extractor as the fallback when it yields nothing.
///
/// Both extractors can panic on malformed font dictionaries, so each runs
/// under `catch_unwind` and a panic counts as a failed extraction.
fn extract_pdf(bytes: &[u8]) -> Result<(String, u32), String> {
    let mut document =
        lopdf::Document::load_mem(bytes).map_err(|e| format!("failed to load PDF: {e}"))?;
    if document.is_encrypted() && document.decrypt("").is_err() {
        return Err("cannot decrypt password-protected PDF".to_string());
    }

    let mut pages: Vec<u32> = document.get_pages().keys().copied().collect();
    pages.sort_unstable();
    let page_count = pages.len() as u32;

    let primary = std::panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }));
    let text = match primary {
        Ok(Ok(text)) if !text.trim().is_empty() => text,
        other => {
            match other {
                Ok(Err(e)) => tracing::debug!(error = %e, "pdf-extract failed, trying lopdf"),
                Err(_) => tracing::warn!("pdf-extract panicked, trying lopdf"),
                Ok(Ok(_)) => {}
            }
            document.decompress();
            std::panic::catch_unwind(AssertUnwindSafe(|| document.extract_text(&pages)))
                .map_err(|_| "text extraction panicked".to_string())?
                .map_err(|e| format!("failed to extract text: {e}"))?
        }
    };

    Ok((text.trim().to_string(), page_count))
}

// ─── DOCX ───────────────────────────────────────────────────────────────────

/// Paragraph text of `word/document.xml`, paragraphs separated by a blank line.
fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("failed to open docx archive: {e}"))?;
    let mut file = archive
        .by_name(DOCX_DOCUMENT_XML)
        .map_err(|e| format!("docx missing document.xml: {e}"))?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|e| format!("failed to read document.xml: {e}"))?;

    docx_paragraphs(&xml).map(|paragraphs| paragraphs.join("\n\n"))
}

fn docx_paragraphs(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = XmlReader::from_str(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_text = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" => current.push('\n'),
                b"w:p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| format!("bad text node: {e}"))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed document.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
