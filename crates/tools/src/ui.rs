//! Local tools that act on the overlay UI instead of the tool server.
//!
//! A tool server result may name a `function_name` that the host handles
//! itself. The set is closed: adding one means adding a [`LocalTool`] variant.

use overlay_core::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

/// Where a widget goes on the overlay grid. Rows and columns start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetPlacement {
    #[serde(alias = "regionType")]
    pub component: String,
    pub row: u32,
    pub col: u32,
    #[serde(default = "one")]
    pub row_span: u32,
    #[serde(default = "one")]
    pub col_span: u32,
}

fn one() -> u32 {
    1
}

impl WidgetPlacement {
    fn validate(&self) -> Result<(), String> {
        if self.component.trim().is_empty() {
            return Err("component must not be empty".into());
        }
        if self.row == 0 || self.col == 0 {
            return Err("row and col start at 1".into());
        }
        if self.row_span == 0 || self.col_span == 0 {
            return Err("spans must be at least 1".into());
        }
        Ok(())
    }
}

impl fmt::Display for WidgetPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at row {}, column {} (row span {}, column span {})",
            self.component, self.row, self.col, self.row_span, self.col_span
        )
    }
}

/// The UI the local tools act on.
pub trait UiSurface: Send + Sync {
    fn add_widget(&self, placement: &WidgetPlacement) -> Result<(), ToolError>;
}

/// What a local tool did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalOutcome {
    pub success: bool,
    pub response_text: String,
    /// The response text is the turn's answer; skip the chat relay.
    pub skip_downstream: bool,
}

impl LocalOutcome {
    fn failed(response_text: String) -> Self {
        Self {
            success: false,
            response_text,
            skip_downstream: false,
        }
    }
}

/// Tools handled in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTool {
    AddWidget,
}

impl LocalTool {
    pub const ALL: [LocalTool; 1] = [LocalTool::AddWidget];

    pub fn name(self) -> &'static str {
        match self {
            Self::AddWidget => "addWidget",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// Whether a local handler exists for `function_name`.
    pub fn validate(function_name: &str) -> bool {
        Self::from_name(function_name).is_some()
    }

    pub fn execute(self, surface: &dyn UiSurface, arguments: &Value) -> LocalOutcome {
        match self {
            Self::AddWidget => add_widget(surface, arguments),
        }
    }
}

/// A local tool request found in a tool payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCall {
    pub tool: LocalTool,
    pub arguments: Value,
}

impl LocalCall {
    /// Read `function_name` and its arguments (`arguments` or `args`) from a
    /// tool payload. `None` when the payload names no known local tool.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let name = payload.get("function_name")?.as_str()?;
        let Some(tool) = LocalTool::from_name(name) else {
            warn!(function_name = %name, "No local handler for function");
            return None;
        };
        let arguments = payload
            .get("arguments")
            .or_else(|| payload.get("args"))
            .cloned()
            .unwrap_or(Value::Null);
        Some(Self { tool, arguments })
    }

    pub fn execute(&self, surface: &dyn UiSurface) -> LocalOutcome {
        self.tool.execute(surface, &self.arguments)
    }
}

fn add_widget(surface: &dyn UiSurface, arguments: &Value) -> LocalOutcome {
    let placement: WidgetPlacement = match serde_json::from_value(arguments.clone()) {
        Ok(p) => p,
        Err(e) => return LocalOutcome::failed(format!("Invalid widget arguments: {e}")),
    };
    if let Err(reason) = placement.validate() {
        return LocalOutcome::failed(format!("Invalid widget placement: {reason}"));
    }

    match surface.add_widget(&placement) {
        Ok(()) => {
            info!(component = %placement.component, row = placement.row, col = placement.col, "Widget added");
            LocalOutcome {
                success: true,
                response_text: format!("Added {placement}."),
                skip_downstream: true,
            }
        }
        Err(e) => {
            warn!(error = %e, "UI surface rejected widget");
            LocalOutcome::failed(e.to_string())
        }
    }
}
