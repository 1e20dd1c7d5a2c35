//! Tool-call resolution loop.
//!
//! Turns a free-text request into one validated tool call:
//!
//! 1. **Select**: ask the model, non-streaming, for a `{"tool", "arguments"}`
//!    object, with the current tool listing in the system prompt
//! 2. **Validate**: extract and check the object ([`crate::extract`])
//! 3. **Retry** with a fixed diagnostic prefixed to the request, until the
//!    attempt budget is spent
//! 4. **Call** the chosen tool exactly once and parse its payload
//!
//! Attempts are strictly sequential: each prompt carries the previous
//! attempt's feedback.

use crate::extract::parse_tool_call;
use overlay_core::error::ValidationError;
use overlay_core::message::Message;
use overlay_core::provider::{CompletionRequest, Provider};
use overlay_core::tool::{ToolCallCandidate, ToolDescriptor, ToolSource};
use overlay_tools::parse_tool_payload;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefixed to the request after an attempt that produced no valid call.
pub const FEEDBACK: &str = "[ Feedback ] Your previous reply was not a valid tool call. \
Reply with exactly one JSON object of the form \
{\"tool\": \"<tool name>\", \"arguments\": {<arguments>}} \
where <tool name> is one of the listed tools and <arguments> is a JSON object. \
Do not add any other keys.";

/// Per-turn attempt bookkeeping. Dropped once the loop returns.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AttemptState {
    pub attempt_count: u32,
    pub feedback_text: Option<String>,
}

impl AttemptState {
    /// The user message as sent on this attempt.
    fn prompt_for(&self, message: &str) -> String {
        match &self.feedback_text {
            Some(feedback) => format!("{feedback}\n\n{message}"),
            None => message.to_string(),
        }
    }
}

/// How a resolution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// A tool was chosen, called once, and its payload parsed.
    Resolved {
        candidate: ToolCallCandidate,
        payload: Value,
        attempts: u32,
    },

    /// Every attempt produced an invalid call; no tool was invoked.
    Exhausted {
        attempts: u32,
        last_error: ValidationError,
    },

    /// The tool server lists no tools, so there is nothing to select.
    NoTools,
}

/// Drives selection, validation and the single tool invocation for a turn.
pub struct ToolCallLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolSource>,
    model: String,
    max_attempts: u32,
}

impl ToolCallLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolSource>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            max_attempts: 5,
        }
    }

    /// Set the attempt budget (at least one attempt is always made).
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Resolve `message` to a tool call and run it.
    ///
    /// Completion failures and tool failures end the loop with an error;
    /// only invalid model output is retried.
    pub async fn resolve(
        &self,
        message: &str,
        history: &[Message],
        on_progress: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<LoopOutcome, overlay_core::Error> {
        let tools = self.tools.list_tools().await?;
        if tools.is_empty() {
            info!("Tool server lists no tools, skipping selection");
            return Ok(LoopOutcome::NoTools);
        }

        let system_prompt = selection_prompt(&tools);
        let mut state = AttemptState::default();

        loop {
            on_progress(&format!(
                "Selecting tool (attempt {}/{})",
                state.attempt_count + 1,
                self.max_attempts
            ));

            let mut messages = Vec::with_capacity(history.len() + 2);
            messages.push(Message::system(&system_prompt));
            messages.extend(history.iter().cloned());
            messages.push(Message::user(state.prompt_for(message)));

            let response = self
                .provider
                .complete(CompletionRequest::new(&self.model, messages))
                .await?;

            match parse_tool_call(&response.message.content, &tools) {
                Ok(candidate) => {
                    let attempts = state.attempt_count + 1;
                    info!(tool = %candidate.tool, attempts, "Tool call resolved");
                    on_progress(&format!("Calling {}", candidate.tool));

                    let raw = self
                        .tools
                        .call_tool(&candidate.tool, candidate.arguments_value())
                        .await?;
                    let payload = parse_tool_payload(&candidate.tool, raw)?;

                    return Ok(LoopOutcome::Resolved {
                        candidate,
                        payload,
                        attempts,
                    });
                }
                Err(error) => {
                    state.attempt_count += 1;
                    debug!(
                        attempt = state.attempt_count,
                        error = %error,
                        "Invalid tool call from model"
                    );
                    if state.attempt_count >= self.max_attempts {
                        warn!(
                            attempts = state.attempt_count,
                            error = %error,
                            "Tool selection exhausted"
                        );
                        return Ok(LoopOutcome::Exhausted {
                            attempts: state.attempt_count,
                            last_error: error,
                        });
                    }
                    state.feedback_text = Some(FEEDBACK.to_string());
                }
            }
        }
    }
}

/// System prompt listing every tool and the required reply template.
pub fn selection_prompt(tools: &[ToolDescriptor]) -> String {
    let mut prompt = String::from(
        "[ Instructions ] You choose which tool answers the user's request. \
Reply with only this JSON object and nothing else:\n\
{\"tool\": \"<tool name>\", \"arguments\": {<arguments matching the tool's input schema>}}\n\n\
## Available Tools\n",
    );
    for tool in tools {
        prompt.push_str(&format!("- {}", tool.name));
        if let Some(description) = tool.description.as_deref().filter(|d| !d.is_empty()) {
            prompt.push_str(&format!(": {description}"));
        }
        prompt.push_str(&format!("\n  input schema: {}\n", tool.input_schema));
    }
    prompt
}
