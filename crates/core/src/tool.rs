//! Tool domain types and the `ToolSource` seam.
//!
//! Tools live in an external subprocess; the agent only ever sees their
//! descriptors and the raw payloads they return. `ToolSource` is the query
//! surface over that process.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool advertised by the tool server's listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The unique tool name
    pub name: String,

    /// Description of what the tool does (sent to the model)
    #[serde(default)]
    pub description: Option<String>,

    /// JSON Schema describing the tool's arguments
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// A validated tool call extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallCandidate {
    /// Name of a currently listed tool
    pub tool: String,

    /// Arguments object passed verbatim to the tool
    pub arguments: Map<String, Value>,
}

impl ToolCallCandidate {
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Query surface over the tool-execution subprocess.
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// The tools currently exposed. Never cached: every call reflects the
    /// process's present state.
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDescriptor>, ToolError>;

    /// Invoke a tool and return its raw result payload.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> std::result::Result<Value, ToolError>;
}
