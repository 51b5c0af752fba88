//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads an HTTP body as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), parses each chunk as JSON, and emits [`StreamEvent`]s.
//! Tool call fragments are passed through unassembled; the orchestrator owns
//! the accumulation.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, Completion, StreamEvent, Usage};

// ─── SSE stream parser ───────────────────────────────────────────────────────

/// Parse a raw SSE byte stream into [`StreamEvent`]s.
///
/// The returned stream always finishes with exactly one `End` (on the
/// `[DONE]` sentinel, or when the body ends without one) unless an error is
/// yielded first, after which it terminates.
pub fn parse_sse_stream<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    stream::unfold(
        (byte_stream, SseState::default()),
        |(mut byte_stream, mut state)| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), (byte_stream, state)));
                }
                if state.finished {
                    return None;
                }

                // Complete SSE event in the buffer?
                if let Some(pos) = find_boundary(&state.buffer) {
                    let raw: Vec<u8> = state.buffer.drain(..pos + 2).collect();
                    let event = String::from_utf8_lossy(&raw[..pos]).into_owned();
                    if let Err(e) = state.process_event(&event) {
                        state.finished = true;
                        return Some((Err(e), (byte_stream, state)));
                    }
                    continue;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => state.push_bytes(bytes.as_ref()),
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, state),
                        ));
                    }
                    None => {
                        // Body ended; flush what is left, then close.
                        let rest = String::from_utf8_lossy(&state.buffer).into_owned();
                        state.buffer.clear();
                        if !rest.trim().is_empty() {
                            if let Err(e) = state.process_event(rest.trim()) {
                                state.finished = true;
                                return Some((Err(e), (byte_stream, state)));
                            }
                        }
                        if !state.finished {
                            state.pending.push_back(StreamEvent::End);
                            state.finished = true;
                        }
                    }
                }
            }
        },
    )
}

fn find_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

// ─── Stream State ────────────────────────────────────────────────────────────

/// Mutable parser state carried between polls.
#[derive(Default)]
struct SseState {
    /// Bytes received but not yet split into events. Kept as bytes so a
    /// multi-byte character split across network chunks survives.
    buffer: Vec<u8>,
    /// Events parsed but not yet yielded (one SSE event can carry text and
    /// several tool call fragments).
    pending: VecDeque<StreamEvent>,
    /// Set once `End` has been queued or an error yielded.
    finished: bool,
}

impl SseState {
    /// Append network bytes, dropping `\r` so CRLF framing splits like LF.
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Process a single SSE event (may contain multiple `data:` lines).
    fn process_event(&mut self, event: &str) -> Result<(), InferenceError> {
        let mut data_content = String::new();

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                let data = data.trim();
                if data == "[DONE]" {
                    self.pending.push_back(StreamEvent::End);
                    self.finished = true;
                    return Ok(());
                }
                data_content.push_str(data);
            }
            // Ignore non-data lines (comments, event types, etc.)
        }

        if data_content.is_empty() {
            return Ok(()); // Keep-alive or comment
        }

        let value: serde_json::Value =
            serde_json::from_str(&data_content).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
            })?;

        if let Some(err) = value.get("error") {
            let reason = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| err.to_string());
            return Err(InferenceError::StreamError { reason });
        }

        let chunk: ChatCompletionChunk =
            serde_json::from_value(value).map_err(|e| InferenceError::StreamError {
                reason: format!("unexpected SSE chunk shape: {e}"),
            })?;

        self.process_chunk(chunk);
        Ok(())
    }

    /// Turn one parsed chunk into queued events.
    fn process_chunk(&mut self, chunk: ChatCompletionChunk) {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                self.pending.push_back(StreamEvent::TextDelta(content));
            }
        }

        for (position, tc) in choice.delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            self.pending.push_back(StreamEvent::ToolCallDelta {
                index: tc.index.unwrap_or(position as u32),
                id: tc.id,
                name,
                arguments,
            });
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Parse a non-streaming response body into a [`Completion`].
pub fn parse_completion_response(body: &str) -> Result<Completion, InferenceError> {
    #[derive(Deserialize)]
    struct NonStreamResponse {
        choices: Vec<NonStreamChoice>,
        #[serde(default)]
        usage: Option<Usage>,
    }

    #[derive(Deserialize)]
    struct NonStreamChoice {
        message: NonStreamMessage,
    }

    #[derive(Deserialize)]
    struct NonStreamMessage {
        content: Option<String>,
    }

    let resp: NonStreamResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse non-streaming response: {e}"),
        })?;

    let choice = resp.choices.into_iter().next().ok_or(InferenceError::StreamError {
        reason: "empty choices array".into(),
    })?;

    Ok(Completion {
        text: choice.message.content.unwrap_or_default(),
        usage: resp.usage,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
