//! Shared test doubles for the agent modules.

use overlay_core::error::{ProviderError, ToolError};
use overlay_core::event::{TurnEvent, TurnEvents, TurnId};
use overlay_core::message::Message;
use overlay_core::provider::{
    ChunkReceiver, CompletionRequest, CompletionResponse, Provider, StreamChunk, Usage,
};
use overlay_core::tool::{ToolDescriptor, ToolSource};
use overlay_tools::{UiSurface, WidgetPlacement};
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and panics
/// when the script runs out. `stream` replays `stream_chunks`.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<String>>,
    call_count: Mutex<usize>,
    stream_chunks: Vec<Result<String, ProviderError>>,
    stream_count: Mutex<usize>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            call_count: Mutex::new(0),
            stream_chunks: Vec::new(),
            stream_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The same completion `n` times.
    pub fn repeating(text: &str, n: usize) -> Self {
        Self::new(vec![text; n])
    }

    pub fn with_stream(mut self, chunks: Vec<&str>) -> Self {
        self.stream_chunks = chunks.into_iter().map(|c| Ok(c.to_string())).collect();
        self
    }

    pub fn with_stream_results(mut self, chunks: Vec<Result<String, ProviderError>>) -> Self {
        self.stream_chunks = chunks;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn stream_count(&self) -> usize {
        *self.stream_count.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        let response = responses[*count].clone();
        *count += 1;
        Ok(make_text_response(&response))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        *self.stream_count.lock().unwrap() += 1;

        let (tx, rx) = mpsc::channel(self.stream_chunks.len() + 1);
        for chunk in &self.stream_chunks {
            let item = chunk.clone().map(|text| StreamChunk {
                content: Some(text),
                done: false,
                usage: None,
            });
            let _ = tx.try_send(item);
        }
        if self.stream_chunks.iter().all(Result::is_ok) {
            let _ = tx.try_send(Ok(StreamChunk {
                content: None,
                done: true,
                usage: Some(usage()),
            }));
        }
        Ok(rx)
    }
}

/// Provider whose endpoint is down.
pub struct UnreachableProvider;

#[async_trait::async_trait]
impl Provider for UnreachableProvider {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        message: Message::assistant(text),
        usage: Some(usage()),
        model: "mock-model".into(),
    }
}

/// Tool source with fixed descriptors and one canned raw result per tool.
pub struct MockToolSource {
    tools: Vec<ToolDescriptor>,
    results: Vec<(String, Value)>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockToolSource {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            results: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The tool server's `tools/call` result for `name`.
    pub fn with_result(mut self, name: &str, raw: Value) -> Self {
        self.results.push((name.to_string(), raw));
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolSource for MockToolSource {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        self.results
            .iter()
            .find(|(tool, _)| tool == name)
            .map(|(_, raw)| raw.clone())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }
}

pub fn ping_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "ping",
        "Reply with pong",
        serde_json::json!({"type": "object", "properties": {}}),
    )
}

/// Records every event it is sent.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<TurnEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<TurnEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn terminal_count(&self) -> usize {
        self.events().iter().filter(|e| e.is_terminal()).count()
    }

    pub fn chunks(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TurnEvent::Chunk { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl TurnEvents for RecordingEvents {
    fn notify_tool_call_progress(&self, turn_id: TurnId, status: &str) {
        self.events.lock().unwrap().push(TurnEvent::ToolCallProgress {
            turn_id,
            status: status.to_string(),
        });
    }

    fn emit_chunk(&self, turn_id: TurnId, text: &str) {
        self.events.lock().unwrap().push(TurnEvent::Chunk {
            turn_id,
            text: text.to_string(),
        });
    }

    fn emit_end(&self, turn_id: TurnId) {
        self.events.lock().unwrap().push(TurnEvent::End { turn_id });
    }

    fn emit_error(&self, turn_id: TurnId, message: &str) {
        self.events.lock().unwrap().push(TurnEvent::Error {
            turn_id,
            message: message.to_string(),
        });
    }
}

/// UI surface that accepts every widget.
#[derive(Default)]
pub struct RecordingSurface {
    pub added: Mutex<Vec<WidgetPlacement>>,
}

impl UiSurface for RecordingSurface {
    fn add_widget(&self, placement: &WidgetPlacement) -> Result<(), ToolError> {
        self.added.lock().unwrap().push(placement.clone());
        Ok(())
    }
}
