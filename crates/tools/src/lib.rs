//! Tools for the overlay agent.
//!
//! Two kinds of tool reach the agent:
//! - tools exposed by the tool server process, reached through
//!   [`McpToolBridge`]
//! - local UI tools ([`LocalTool`]) that a tool result can ask the host to
//!   run, such as placing a widget on the overlay grid

pub mod bridge;
pub mod ui;

pub use bridge::{McpToolBridge, parse_tool_payload};
pub use ui::{LocalCall, LocalOutcome, LocalTool, UiSurface, WidgetPlacement};
