//! Ollama `/api/chat` provider.
//!
//! Supports:
//! - Non-streaming chat (one JSON object with `message.content`)
//! - Streaming chat (newline-delimited JSON fragments, closed by a `done` fragment)

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use overlay_config::LlmConfig;
use overlay_core::error::ProviderError;
use overlay_core::framing::LineFramer;
use overlay_core::message::Message;
use overlay_core::provider::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A provider for a locally hosted Ollama server.
pub struct OllamaProvider {
    base_url: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_timeout(base_url, Duration::from_secs(120))
    }

    /// `request_timeout` bounds non-streaming calls only; a stream may run
    /// as long as the model keeps producing.
    pub fn with_timeout(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
            client,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        Self::with_timeout(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Convert our Message types to the wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> ChatRequest<'_> {
        ChatRequest {
            model: &request.model,
            messages: Self::to_api_messages(&request.messages),
            stream,
        }
    }
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turn a non-200 response into the matching error.
async fn error_for_status(response: reqwest::Response, model: &str) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or(body);

    warn!(status, %message, "Completion endpoint returned error");
    if status == 404 && message.contains("not found") {
        return ProviderError::ModelNotFound(model.to_string());
    }
    ProviderError::ApiError {
        status_code: status,
        message,
    }
}

#[async_trait]
impl overlay_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        debug!(model = %request.model, messages = request.messages.len(), "Sending completion request");

        let response = self
            .client
            .post(self.chat_url())
            .timeout(self.request_timeout)
            .json(&Self::request_body(&request, false))
            .send()
            .await
            .map_err(map_send_error)?;

        if response.status().as_u16() != 200 {
            return Err(error_for_status(response, &request.model).await);
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| {
                ProviderError::InvalidResponse(format!("Failed to parse response: {e}"))
            })?;

        if let Some(error) = api_response.error {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: error,
            });
        }

        let usage = api_response.usage();
        let content = api_response
            .message
            .map(|m| m.content)
            .ok_or_else(|| ProviderError::InvalidResponse("No message in response".into()))?;

        Ok(CompletionResponse {
            message: Message::assistant(content),
            usage,
            model: if api_response.model.is_empty() {
                request.model
            } else {
                api_response.model
            },
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        debug!(model = %request.model, messages = request.messages.len(), "Sending streaming request");

        let response = self
            .client
            .post(self.chat_url())
            .json(&Self::request_body(&request, true))
            .send()
            .await
            .map_err(map_send_error)?;

        if response.status().as_u16() != 200 {
            return Err(error_for_status(response, &request.model).await);
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_fragments(response.bytes_stream(), tx));
        Ok(rx)
    }
}

/// Read NDJSON fragments off a response body and forward them as chunks.
///
/// Ends after the `done` fragment, an `error` fragment, a transport error, or
/// the end of the body, whichever comes first. A final `done` chunk is always
/// sent unless the receiver went away or the stream failed.
async fn pump_fragments<S, B, E>(bytes: S, tx: mpsc::Sender<Result<StreamChunk, ProviderError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut framer = LineFramer::new();

    while let Some(next) = bytes.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };
        for value in framer.push(chunk.as_ref()) {
            if forward_fragment(value, &tx).await.is_break() {
                return;
            }
        }
    }

    if let Some(value) = framer.finish()
        && forward_fragment(value, &tx).await.is_break()
    {
        return;
    }

    debug!("Stream closed without a done fragment");
    let _ = tx
        .send(Ok(StreamChunk {
            content: None,
            done: true,
            usage: None,
        }))
        .await;
}

async fn forward_fragment(
    value: Value,
    tx: &mpsc::Sender<Result<StreamChunk, ProviderError>>,
) -> ControlFlow<()> {
    let fragment: ChatResponse = match serde_json::from_value(value) {
        Ok(fragment) => fragment,
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream fragment");
            return ControlFlow::Continue(());
        }
    };

    if let Some(error) = fragment.error {
        let _ = tx.send(Err(ProviderError::StreamInterrupted(error))).await;
        return ControlFlow::Break(());
    }

    let usage = fragment.usage();
    let content = fragment
        .message
        .map(|m| m.content)
        .filter(|c| !c.is_empty());

    if fragment.done {
        if let Some(usage) = usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Stream finished"
            );
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content,
                done: true,
                usage,
            }))
            .await;
        return ControlFlow::Break(());
    }

    if let Some(content) = content {
        let chunk = StreamChunk {
            content: Some(content),
            done: false,
            usage: None,
        };
        if tx.send(Ok(chunk)).await.is_err() {
            // receiver dropped
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Both the non-streaming reply and each streaming fragment.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    message: Option<ApiResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

impl ChatResponse {
    fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        let prompt_tokens = self.prompt_eval_count.unwrap_or(0);
        let completion_tokens = self.eval_count.unwrap_or(0);
        Some(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::Provider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn ok_bytes(parts: &[&str]) -> Vec<Result<Vec<u8>, std::io::Error>> {
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
    }

    async fn collect(rx: &mut ChunkReceiver) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn constructor_trims_trailing_slash() {
        let provider = OllamaProvider::new("http://localhost:11434/").unwrap();
        assert_eq!(provider.base_url(), "http://localhost:11434");
        assert_eq!(provider.chat_url(), "http://localhost:11434/api/chat");
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn request_body_shape() {
        let request = CompletionRequest::new(
            "gemma:2b",
            vec![Message::system("Be brief"), Message::user("Hello")],
        );
        let body = serde_json::to_value(OllamaProvider::request_body(&request, true)).unwrap();
        assert_eq!(body["model"], "gemma:2b");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert!(body.get("options").is_none());
    }

    #[tokio::test]
    async fn fragments_split_across_chunks_arrive_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let parts = ok_bytes(&[
            "{\"message\":{\"content\":\"Hé",
            "llo\"},\"done\":false}\n{\"message\":{\"con",
            "tent\":\" world\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true,\"prompt_eval_count\":12,\"eval_count\":3}\n",
        ]);
        pump_fragments(futures::stream::iter(parts), tx).await;

        let chunks = collect(&mut rx).await;
        let texts: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.as_ref().unwrap().content.clone())
            .collect();
        assert_eq!(texts, vec!["Héllo", " world"]);

        let last = chunks.last().unwrap().as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn malformed_fragments_are_skipped() {
        let (tx, mut rx) = mpsc::channel(16);
        let parts = ok_bytes(&[
            "{\"message\":{\"content\":\"a\"}}\n",
            "not json at all\n",
            "{\"message\":42}\n",
            "{\"message\":{\"content\":\"b\"}}\n",
        ]);
        pump_fragments(futures::stream::iter(parts), tx).await;

        let chunks = collect(&mut rx).await;
        let texts: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.as_ref().unwrap().content.clone())
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(chunks.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn error_fragment_ends_the_stream() {
        let (tx, mut rx) = mpsc::channel(16);
        let parts = ok_bytes(&[
            "{\"message\":{\"content\":\"partial\"}}\n",
            "{\"error\":\"model crashed\"}\n",
            "{\"message\":{\"content\":\"never\"}}\n",
        ]);
        pump_fragments(futures::stream::iter(parts), tx).await;

        let chunks = collect(&mut rx).await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(
            &chunks[1],
            Err(ProviderError::StreamInterrupted(msg)) if msg == "model crashed"
        ));
    }

    #[tokio::test]
    async fn transport_error_interrupts() {
        let (tx, mut rx) = mpsc::channel(16);
        let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"{\"message\":{\"content\":\"x\"}}\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        pump_fragments(futures::stream::iter(parts), tx).await;

        let chunks = collect(&mut rx).await;
        assert!(matches!(chunks.last(), Some(Err(ProviderError::StreamInterrupted(_)))));
    }

    #[tokio::test]
    async fn unterminated_final_fragment_is_flushed() {
        let (tx, mut rx) = mpsc::channel(16);
        let parts = ok_bytes(&["{\"message\":{\"content\":\"tail\"},\"done\":true}"]);
        pump_fragments(futures::stream::iter(parts), tx).await;

        let chunks = collect(&mut rx).await;
        assert_eq!(chunks.len(), 1);
        let chunk = chunks[0].as_ref().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("tail"));
        assert!(chunk.done);
    }

    // --- Over a real socket ---

    /// Serve one HTTP response, returning the base URL and the raw request.
    async fn serve_once(
        status: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n{body}"
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = socket.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn complete_over_http() {
        let body = r#"{"model":"gemma:2b","message":{"role":"assistant","content":"{\"tool\": \"ping\", \"arguments\": {}}"},"done":true,"prompt_eval_count":40,"eval_count":9}"#;
        let (base_url, server) = serve_once("200 OK", body.to_string()).await;

        let provider = OllamaProvider::new(base_url).unwrap();
        let response = provider
            .complete(CompletionRequest::new("gemma:2b", vec![Message::user("ping")]))
            .await
            .unwrap();

        assert_eq!(response.message.content, r#"{"tool": "ping", "arguments": {}}"#);
        assert_eq!(response.usage.unwrap().prompt_tokens, 40);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/chat"));
        assert!(request.contains(r#""stream":false"#));
    }

    #[tokio::test]
    async fn stream_over_http() {
        let body = [
            r#"{"message":{"content":"Hel"},"done":false}"#,
            r#"{"message":{"content":"lo"},"done":false}"#,
            r#"{"message":{"content":""},"done":true,"eval_count":2}"#,
        ]
        .join("\n")
            + "\n";
        let (base_url, _server) = serve_once("200 OK", body).await;

        let provider = OllamaProvider::new(base_url).unwrap();
        let mut rx = provider
            .stream(CompletionRequest::new("gemma:2b", vec![Message::user("hi")]))
            .await
            .unwrap();

        let chunks = collect(&mut rx).await;
        let text: String = chunks
            .iter()
            .filter_map(|c| c.as_ref().unwrap().content.clone())
            .collect();
        assert_eq!(text, "Hello");
        assert!(chunks.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn missing_model_is_reported() {
        let (base_url, _server) =
            serve_once("404 Not Found", r#"{"error":"model 'nope' not found"}"#.to_string()).await;

        let provider = OllamaProvider::new(base_url).unwrap();
        let err = provider
            .complete(CompletionRequest::new("nope", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound(model) if model == "nope"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = OllamaProvider::new(format!("http://{addr}")).unwrap();
        let err = provider
            .stream(CompletionRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }
}
