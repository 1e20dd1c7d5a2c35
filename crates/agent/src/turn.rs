//! One user turn, end to end.
//!
//! Loads history, resolves and runs a tool (unless skipped), optionally lets a
//! local UI tool answer directly, streams the reply, and records the exchange.
//! Every turn emits exactly one terminal event: `end` on success, `error` on
//! any failure.

use crate::relay::ChatRelay;
use crate::resolution::{LoopOutcome, ToolCallLoop};
use overlay_config::{AppConfig, ExhaustionPolicy};
use overlay_core::event::{TurnEvents, TurnId};
use overlay_core::message::Message;
use overlay_core::provider::Provider;
use overlay_core::store::{ConversationStore, MessageRecord, history_from_records, title_from};
use overlay_core::tool::{ToolCallCandidate, ToolSource};
use overlay_tools::{LocalCall, UiSurface};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A user message and how to treat it.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub turn_id: TurnId,
    pub conversation_id: Option<String>,
    pub message: String,
    /// Go straight to the chat relay
    pub skip_tools: bool,
    /// Record the exchange in the store
    pub persist: bool,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            turn_id: TurnId::new(),
            conversation_id: None,
            message: message.into(),
            skip_tools: false,
            persist: true,
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn skipping_tools(mut self) -> Self {
        self.skip_tools = true;
        self
    }

    /// System-issued turns are answered but not stored.
    pub fn without_persist(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// What a finished turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    pub turn_id: TurnId,
    pub response: String,
    /// The tool that ran, if any
    pub tool: Option<String>,
    /// Selection attempts spent (0 when tools were skipped)
    pub attempts: u32,
    /// A local UI tool answered and the chat relay was skipped
    pub short_circuited: bool,
}

/// Result of the tool stage of a turn.
enum ToolStage {
    /// Fold this into the relay request.
    Context {
        text: Option<String>,
        tool: Option<String>,
        attempts: u32,
    },
    /// A local tool produced the final answer.
    Answered {
        text: String,
        tool: String,
        attempts: u32,
    },
}

/// Runs turns against one provider, tool source and event sink.
pub struct TurnRunner {
    resolver: ToolCallLoop,
    relay: ChatRelay,
    events: Arc<dyn TurnEvents>,
    store: Option<Arc<dyn ConversationStore>>,
    surface: Option<Arc<dyn UiSurface>>,
    on_exhausted: ExhaustionPolicy,
}

impl TurnRunner {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolSource>,
        events: Arc<dyn TurnEvents>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            resolver: ToolCallLoop::new(provider.clone(), tools, model.clone()),
            relay: ChatRelay::new(provider, model, system_prompt),
            events,
            store: None,
            surface: None,
            on_exhausted: ExhaustionPolicy::default(),
        }
    }

    /// Build from the `[llm]` and `[resolution]` config sections.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolSource>,
        events: Arc<dyn TurnEvents>,
    ) -> Self {
        Self::new(
            provider,
            tools,
            events,
            &config.llm.model,
            &config.llm.system_prompt,
        )
        .with_max_attempts(config.resolution.max_attempts)
        .with_exhaustion_policy(config.resolution.on_exhausted)
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.resolver = self.resolver.with_max_attempts(max);
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.on_exhausted = policy;
        self
    }

    /// Attach a store for history and persistence.
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the UI that local tools act on.
    pub fn with_surface(mut self, surface: Arc<dyn UiSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Run one turn. The error, if any, has already been emitted as the
    /// turn's `error` event.
    pub async fn run(&self, request: TurnRequest) -> Result<TurnSummary, overlay_core::Error> {
        let turn_id = request.turn_id;
        info!(
            turn_id = %turn_id,
            conversation_id = request.conversation_id.as_deref().unwrap_or("-"),
            skip_tools = request.skip_tools,
            "Processing turn"
        );

        match self.execute(&request).await {
            Ok(summary) => {
                self.events.emit_end(turn_id);
                self.persist(&request, &summary.response).await;
                Ok(summary)
            }
            Err(e) => {
                warn!(turn_id = %turn_id, error = %e, "Turn failed");
                self.events.emit_error(turn_id, &e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(&self, request: &TurnRequest) -> Result<TurnSummary, overlay_core::Error> {
        let turn_id = request.turn_id;
        let history = self.load_history(request).await?;

        let stage = if request.skip_tools {
            ToolStage::Context {
                text: None,
                tool: None,
                attempts: 0,
            }
        } else {
            self.tool_stage(turn_id, &request.message, &history).await?
        };

        let (tool_context, tool, attempts) = match stage {
            ToolStage::Answered {
                text,
                tool,
                attempts,
            } => {
                self.events.emit_chunk(turn_id, &text);
                return Ok(TurnSummary {
                    turn_id,
                    response: text,
                    tool: Some(tool),
                    attempts,
                    short_circuited: true,
                });
            }
            ToolStage::Context {
                text,
                tool,
                attempts,
            } => (text, tool, attempts),
        };

        let events = &self.events;
        let response = self
            .relay
            .stream(&request.message, &history, tool_context.as_deref(), |text| {
                events.emit_chunk(turn_id, text)
            })
            .await?;

        Ok(TurnSummary {
            turn_id,
            response,
            tool,
            attempts,
            short_circuited: false,
        })
    }

    async fn tool_stage(
        &self,
        turn_id: TurnId,
        message: &str,
        history: &[Message],
    ) -> Result<ToolStage, overlay_core::Error> {
        let events = &self.events;
        let progress = |status: &str| events.notify_tool_call_progress(turn_id, status);

        match self.resolver.resolve(message, history, &progress).await? {
            LoopOutcome::Resolved {
                candidate,
                payload,
                attempts,
            } => {
                let mut local_text = None;
                if let Some(call) = LocalCall::from_payload(&payload) {
                    match &self.surface {
                        Some(surface) => {
                            let outcome = call.execute(surface.as_ref());
                            if outcome.skip_downstream {
                                return Ok(ToolStage::Answered {
                                    text: outcome.response_text,
                                    tool: candidate.tool,
                                    attempts,
                                });
                            }
                            local_text = Some(outcome.response_text);
                        }
                        None => warn!(
                            function_name = call.tool.name(),
                            "No UI surface attached, ignoring local tool"
                        ),
                    }
                }
                Ok(ToolStage::Context {
                    text: Some(tool_context(&candidate, &payload, local_text.as_deref())),
                    tool: Some(candidate.tool),
                    attempts,
                })
            }
            LoopOutcome::Exhausted {
                attempts,
                last_error,
            } => match self.on_exhausted {
                ExhaustionPolicy::Continue => {
                    info!(attempts, "No tool selected, answering without tool context");
                    Ok(ToolStage::Context {
                        text: None,
                        tool: None,
                        attempts,
                    })
                }
                ExhaustionPolicy::Abort => Err(overlay_core::Error::ResolutionExhausted {
                    attempts,
                    last: last_error,
                }),
            },
            LoopOutcome::NoTools => Ok(ToolStage::Context {
                text: None,
                tool: None,
                attempts: 0,
            }),
        }
    }

    async fn load_history(
        &self,
        request: &TurnRequest,
    ) -> Result<Vec<Message>, overlay_core::Error> {
        let (Some(store), Some(conversation_id)) = (&self.store, &request.conversation_id) else {
            return Ok(Vec::new());
        };
        let records = store.messages(conversation_id).await?;
        debug!(conversation_id = %conversation_id, turns = records.len(), "Loaded history");
        Ok(history_from_records(&records))
    }

    /// Record the exchange. Failures are logged; the turn already ended.
    async fn persist(&self, request: &TurnRequest, response: &str) {
        if !request.persist {
            return;
        }
        let (Some(store), Some(conversation_id)) = (&self.store, &request.conversation_id) else {
            return;
        };

        let result = async {
            if store.get_conversation(conversation_id).await?.is_none() {
                store
                    .add_conversation(conversation_id, &title_from(&request.message))
                    .await?;
            }
            store
                .add_message(MessageRecord::new(
                    conversation_id,
                    &request.message,
                    response,
                ))
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(conversation_id = %conversation_id, error = %e, "Failed to save turn");
        }
    }
}

/// System message carrying a tool's result into the chat relay.
pub fn tool_context(
    candidate: &ToolCallCandidate,
    payload: &Value,
    local_text: Option<&str>,
) -> String {
    let mut context = format!(
        "[ Tool Result ] The tool \"{}\" was called with arguments {} and returned:\n{}",
        candidate.tool,
        candidate.arguments_value(),
        serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string()),
    );
    if let Some(text) = local_text {
        context.push_str(&format!("\n{text}"));
    }
    context.push_str("\nUse this result to answer the user.");
    context
}
