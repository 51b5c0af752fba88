//! Push events to the UI collaborator.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

/// One event pushed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum UiEvent {
    StreamChunk(String),
    StreamEnd,
    StreamError(String),
}

/// Receiver side of UI events. Delivery is best-effort and in order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

impl EventSink for mpsc::UnboundedSender<UiEvent> {
    fn emit(&self, event: UiEvent) {
        if self.send(event).is_err() {
            tracing::debug!("UI event receiver dropped");
        }
    }
}

/// Sink that keeps every event, for inspection.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<UiEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Concatenation of every `StreamChunk`.
    pub fn text(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::StreamChunk(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: UiEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
