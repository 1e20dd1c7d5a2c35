//! Tool server bridge: `tools/list` and `tools/call` over the RPC client.

use async_trait::async_trait;
use overlay_core::error::ToolError;
use overlay_core::tool::{ToolDescriptor, ToolSource};
use overlay_mcp::RpcClient;
use overlay_mcp::protocol::{METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, ToolCallParams, ToolCallResult};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

/// [`ToolSource`] backed by the tool server process.
///
/// Holds the client by `Arc` so the host can still stop it at shutdown.
#[derive(Clone)]
pub struct McpToolBridge {
    client: Arc<RpcClient>,
}

impl McpToolBridge {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }
}

#[async_trait]
impl ToolSource for McpToolBridge {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let raw = self
            .client
            .call(METHOD_TOOLS_LIST, Some(serde_json::json!({})))
            .await?;
        let listing: ToolsListResult = serde_json::from_value(raw).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: METHOD_TOOLS_LIST.into(),
                reason: format!("malformed listing: {e}"),
            }
        })?;
        debug!(count = listing.tools.len(), "Listed tools");
        Ok(listing.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let params = serde_json::to_value(params).map_err(|e| {
            ToolError::InvalidArguments(format!("cannot encode arguments for {name}: {e}"))
        })?;
        debug!(tool = %name, "Calling tool");
        Ok(self.client.call(METHOD_TOOLS_CALL, Some(params)).await?)
    }
}

/// Turn a raw `tools/call` result into the tool's structured output.
///
/// Order of preference: an `isError` result fails with its text;
/// `structuredContent` is taken as-is; otherwise the text blocks must parse
/// as JSON.
pub fn parse_tool_payload(tool_name: &str, raw: Value) -> Result<Value, ToolError> {
    let failed = |reason: String| ToolError::ExecutionFailed {
        tool_name: tool_name.to_string(),
        reason,
    };

    let result: ToolCallResult =
        serde_json::from_value(raw).map_err(|e| failed(format!("malformed result: {e}")))?;
    let text = result.text();

    if result.is_error {
        let reason = if text.is_empty() {
            "tool reported an error".to_string()
        } else {
            text
        };
        return Err(failed(reason));
    }

    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }

    if text.trim().is_empty() {
        return Err(failed("tool returned no content".into()));
    }

    serde_json::from_str(text.trim()).map_err(|e| failed(format!("result is not JSON: {e}")))
}
