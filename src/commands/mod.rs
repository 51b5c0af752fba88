//! Commands exposed to the UI collaborator.
//!
//! Each command takes the shared [`AppState`](crate::AppState) and returns
//! `Result<T, String>`, the error already rendered for display.

pub mod chat;
pub mod files;
pub mod mcp;
pub mod session;
pub mod settings;
