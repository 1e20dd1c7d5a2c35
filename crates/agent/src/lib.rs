//! The agent side of a turn.
//!
//! A user message goes through two stages:
//!
//! 1. **Resolve** a tool call from free-form model output, retrying with
//!    feedback up to a fixed budget, and run that tool once
//!    ([`ToolCallLoop`], extraction in [`extract`])
//! 2. **Relay** a streaming reply with the tool's result folded into the
//!    context ([`ChatRelay`])
//!
//! [`TurnRunner`] composes both, applies local UI tools, persists the
//! exchange, and reports everything through [`overlay_core::TurnEvents`].

pub mod extract;
pub mod relay;
pub mod resolution;
pub mod turn;

#[cfg(test)]
mod test_helpers;

pub use extract::{extract_candidate, parse_tool_call, validate_candidate};
pub use relay::ChatRelay;
pub use resolution::{AttemptState, FEEDBACK, LoopOutcome, ToolCallLoop};
pub use turn::{TurnRequest, TurnRunner, TurnSummary};
