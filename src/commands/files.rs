//! File attachment ingestion command.

use std::path::PathBuf;

use crate::agent_core::attachments::ingest_file;
use crate::agent_core::Attachment;

/// Read a file into an attachment descriptor. Extraction runs on the
/// blocking pool since PDF parsing can take a while.
pub async fn upload_file(path: impl Into<PathBuf>) -> Result<Attachment, String> {
    let path = path.into();
    tokio::task::spawn_blocking(move || ingest_file(&path))
        .await
        .map_err(|e| format!("upload task failed: {e}"))?
        .map_err(|e| e.to_string())
}
