//! OpenAI-compatible model gateway client.
//!
//! Sends chat completion requests to the configured provider and returns
//! either a lazy stream of [`StreamEvent`]s or a one-shot [`Completion`].
//! A single attempt is made per call; retry policy belongs to the caller.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client as HttpClient;

use super::config::GatewayConfig;
use super::errors::InferenceError;
use super::messages::supports_function_calling;
use super::streaming::{parse_completion_response, parse_sse_stream};
use super::types::{ChatCompletionRequest, ChatMessage, Completion, SamplingParams, StreamEvent, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Total request timeout for streaming calls.
///
/// Long tool-augmented histories can take a while before the first token.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ─── ModelBackend ────────────────────────────────────────────────────────────

/// A lazy, finite, non-restartable sequence of gateway events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, InferenceError>> + Send>>;

/// The model gateway as seen by the orchestrator.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Open a streamed completion. `tools` is attached only when it is
    /// non-empty and `model` supports function calling.
    async fn complete_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> Result<EventStream, InferenceError>;

    /// One-shot completion without tools.
    async fn complete_once(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<Completion, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client for the active provider.
pub struct InferenceClient {
    /// HTTP client for non-streaming requests (30s timeout).
    http: HttpClient,
    /// HTTP client for streaming requests (180s timeout).
    http_stream: HttpClient,
    config: GatewayConfig,
}

impl InferenceClient {
    /// Create a client for a resolved gateway configuration.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn new(config: GatewayConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            config,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The model used when the caller does not name one.
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    async fn send(
        &self,
        http: &HttpClient,
        body: &ChatCompletionRequest,
        timeout: Duration,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = self.endpoint();

        // Metadata only; the body can be huge
        tracing::info!(
            url = %url,
            provider = self.config.provider.id(),
            model = %body.model,
            message_count = body.messages.len(),
            has_tools = body.tools.is_some(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            stream = body.stream,
            "=== MODEL REQUEST ==="
        );

        let mut request = http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body);
        if body.stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: timeout.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "model request rejected");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelBackend for InferenceClient {
    async fn complete_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> Result<EventStream, InferenceError> {
        let body = build_request(model, messages, tools, self.config.sampling, true);
        let response = self.send(&self.http_stream, &body, STREAM_REQUEST_TIMEOUT).await?;
        Ok(Box::pin(parse_sse_stream(Box::pin(response.bytes_stream()))))
    }

    async fn complete_once(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<Completion, InferenceError> {
        let body = build_request(model, messages, &[], self.config.sampling, false);
        let response = self.send(&self.http, &body, REQUEST_TIMEOUT).await?;

        let body_text = response.text().await.map_err(|e| InferenceError::StreamError {
            reason: format!("failed to read response body: {e}"),
        })?;

        let completion = parse_completion_response(&body_text)?;
        tracing::info!(
            text_len = completion.text.len(),
            total_tokens = completion.usage.map(|u| u.total_tokens).unwrap_or(0),
            "=== MODEL RESPONSE ==="
        );
        Ok(completion)
    }
}

/// Assemble a request body. Tools are attached only when the catalog is
/// non-empty and the model is known to support function calling.
pub fn build_request(
    model: &str,
    messages: Vec<ChatMessage>,
    tools: &[ToolDefinition],
    sampling: SamplingParams,
    stream: bool,
) -> ChatCompletionRequest {
    let tools = (!tools.is_empty() && supports_function_calling(model)).then(|| tools.to_vec());
    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        tool_choice: tools.as_ref().map(|_| "auto".to_string()),
        tools,
        temperature: sampling.temperature,
        max_tokens: sampling.max_tokens,
        stream,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::config::ProviderKind;
    use crate::inference::types::{FunctionDefinition, Role};
    use futures::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn tool_def(name: &str) -> ToolDefinition {
        ToolDefinition {
            r#type: "function".into(),
            function: FunctionDefinition {
                name: name.into(),
                description: "d".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        }
    }

    fn config(base_url: String) -> GatewayConfig {
        GatewayConfig {
            provider: ProviderKind::OpenAi,
            api_key: "sk-test".into(),
            base_url,
            default_model: "gpt-4o".into(),
            sampling: SamplingParams::default(),
        }
    }

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status: &'static str, content_type: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{addr}/v1"), handle)
    }

    #[test]
    fn test_tools_attached_only_when_supported() {
        let msgs = vec![ChatMessage::text(Role::User, "hi")];
        let tools = vec![tool_def("github_search")];

        let req = build_request("gpt-4o", msgs.clone(), &tools, SamplingParams::default(), true);
        assert_eq!(req.tools.as_ref().map(|t| t.len()), Some(1));
        assert_eq!(req.tool_choice.as_deref(), Some("auto"));

        let req = build_request("o1-mini", msgs.clone(), &tools, SamplingParams::default(), true);
        assert!(req.tools.is_none());
        assert!(req.tool_choice.is_none());

        let req = build_request("gpt-4o", msgs, &[], SamplingParams::default(), false);
        assert!(req.tools.is_none());
        assert!(!req.stream);
        assert_eq!(req.temperature, 0.7);
        assert_eq!(req.max_tokens, 4000);
    }

    #[tokio::test]
    async fn test_complete_stream_against_local_server() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        )
        .to_string();
        let (base, server) = serve_once("200 OK", "text/event-stream", sse).await;
        let client = InferenceClient::new(config(base)).unwrap();

        let stream = client
            .complete_stream("gpt-4o", vec![ChatMessage::text(Role::User, "Hello")], &[])
            .await
            .unwrap();
        let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hel".into()),
                StreamEvent::TextDelta("lo".into()),
                StreamEvent::End,
            ]
        );

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(request.contains("\"stream\":true"));
    }

    #[tokio::test]
    async fn test_complete_once_parses_usage() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Paris"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 1, "total_tokens": 11},
        })
        .to_string();
        let (base, _server) = serve_once("200 OK", "application/json", body).await;
        let client = InferenceClient::new(config(base)).unwrap();

        let completion = client
            .complete_once("gpt-4o", vec![ChatMessage::text(Role::User, "Capital of France?")])
            .await
            .unwrap();
        assert_eq!(completion.text, "Paris");
        assert_eq!(completion.usage.unwrap().total_tokens, 11);
    }

    #[tokio::test]
    async fn test_http_error_carries_provider_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided"}}"#.to_string();
        let (base, _server) = serve_once("401 Unauthorized", "application/json", body).await;
        let client = InferenceClient::new(config(base)).unwrap();

        let err = client
            .complete_stream("gpt-4o", vec![ChatMessage::text(Role::User, "hi")], &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, InferenceError::HttpError { status: 401, .. }));
        assert_eq!(err.message(), "401: Incorrect API key provided");
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = InferenceClient::new(config(format!("http://{addr}/v1"))).unwrap();
        let err = client
            .complete_once("gpt-4o", vec![ChatMessage::text(Role::User, "hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::ConnectionFailed { .. }));
    }
}
