//! Error types for the overlay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] wraps them all.

use thiserror::Error;

/// The top-level error type for all overlay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool server transport ---
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    // --- Completion endpoint ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Tool selection ---
    #[error("No valid tool call after {attempts} attempts: {last}")]
    ResolutionExhausted { attempts: u32, last: ValidationError },

    // --- Conversation storage ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the JSON-RPC client talking to the tool subprocess.
///
/// `Clone` because a single process exit fans out to every pending call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("Tool server failed to start: {0}")]
    Startup(String),

    #[error("Tool server timed out calling {method} after {timeout_secs}s")]
    Timeout { method: String, timeout_secs: u64 },

    #[error("Tool server exited")]
    ProcessExited,

    #[error("Tool server is not running")]
    NotRunning,

    #[error("Tool server error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),
}

/// One inbound line that could not be decoded.
///
/// Never propagated past the framer; it is logged and the line dropped.
#[derive(Debug, Clone, Error)]
#[error("Unparseable frame ({reason}): {line}")]
pub struct FrameError {
    pub line: String,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Why a completion could not be accepted as a tool call.
///
/// Recovered by the resolution loop through retries; only reported once the
/// attempt budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no tool call object found in model output")]
    NoCandidate,

    #[error("tool call must have exactly the keys \"tool\" and \"arguments\", found {found:?}")]
    WrongKeys { found: Vec<String> },

    #[error("\"tool\" must be a string")]
    ToolNotString,

    #[error("\"arguments\" must be an object")]
    ArgumentsNotObject,

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_names_method_and_deadline() {
        let err = Error::Rpc(RpcError::Timeout {
            method: "tools/call".into(),
            timeout_secs: 30,
        });
        assert!(err.to_string().contains("tools/call"));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn tool_error_wraps_rpc_error_transparently() {
        let err = ToolError::from(RpcError::ProcessExited);
        assert_eq!(err.to_string(), "Tool server exited");
        assert!(matches!(err, ToolError::Rpc(RpcError::ProcessExited)));
    }

    #[test]
    fn validation_error_lists_found_keys() {
        let err = ValidationError::WrongKeys {
            found: vec!["tool".into(), "args".into()],
        };
        assert!(err.to_string().contains("args"));
    }
}
