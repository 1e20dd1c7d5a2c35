//! Streaming chat relay.
//!
//! Sends `[system prompt, ...history, tool context?, user message]` as a
//! streaming completion and hands every text fragment to the caller in
//! arrival order.

use overlay_core::error::ProviderError;
use overlay_core::message::Message;
use overlay_core::provider::{CompletionRequest, Provider};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ChatRelay {
    provider: Arc<dyn Provider>,
    model: String,
    system_prompt: String,
}

impl ChatRelay {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: system_prompt.into(),
        }
    }

    /// The message list for one relay request.
    pub fn compose(
        &self,
        message: &str,
        history: &[Message],
        tool_context: Option<&str>,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(history.iter().cloned());
        if let Some(context) = tool_context {
            messages.push(Message::system(context));
        }
        messages.push(Message::user(message));
        messages
    }

    /// Stream a reply, calling `on_chunk` for each fragment.
    ///
    /// Returns the concatenated text once the stream ends. Fragments already
    /// delivered stay delivered when the stream fails part-way.
    pub async fn stream<F>(
        &self,
        message: &str,
        history: &[Message],
        tool_context: Option<&str>,
        mut on_chunk: F,
    ) -> Result<String, ProviderError>
    where
        F: FnMut(&str) + Send,
    {
        let mut request =
            CompletionRequest::new(&self.model, self.compose(message, history, tool_context));
        request.stream = true;

        debug!(
            provider = self.provider.name(),
            messages = request.messages.len(),
            with_tool_context = tool_context.is_some(),
            "Starting chat relay"
        );

        let mut rx = self.provider.stream(request).await?;
        let mut full = String::new();

        while let Some(item) = rx.recv().await {
            let chunk = item?;
            if let Some(text) = chunk.content.as_deref()
                && !text.is_empty()
            {
                on_chunk(text);
                full.push_str(text);
            }
            if let Some(usage) = chunk.usage {
                info!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total_tokens,
                    "Chat relay finished"
                );
            }
            if chunk.done {
                break;
            }
        }

        Ok(full)
    }
}
