//! Agent Core: orchestration layer for DataBrain.
//!
//! Submodules:
//! - `database`: JSON-file Conversation Store for chats, messages, settings
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types
//! - `events`: UI event push (`streamChunk`, `streamEnd`, `streamError`)
//! - `tool_router`: In-flight tool-call table and batch dispatch to MCP servers
//! - `conversation`: Stored history to provider messages, context injection
//! - `orchestrator`: Streaming turn loop with bounded tool rounds
//! - `export`: Transcript export and import
//! - `attachments`: File ingestion into attachment descriptors

pub mod attachments;
pub mod conversation;
pub mod database;
pub mod errors;
pub mod events;
pub mod export;
pub mod orchestrator;
pub mod tool_router;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use database::{ChatStore, Settings};
pub use errors::AgentError;
pub use events::{EventSink, UiEvent};
pub use export::ExportFormat;
pub use orchestrator::{BusyChats, TurnOrchestrator, TurnRequest};
pub use types::{Attachment, AttachmentKind, Chat, ChatExport, ChatSummary, StoredMessage};
