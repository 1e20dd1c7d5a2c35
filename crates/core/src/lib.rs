//! # Overlay Core
//!
//! Domain types, traits, and error definitions shared by every crate in the
//! overlay agent. This crate has **no runtime dependencies beyond tokio's sync
//! primitives**: it defines the model that the transport, provider, tool,
//! storage and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator at a process boundary is a trait here:
//! - [`Provider`]: the local completion endpoint
//! - [`ToolSource`]: the tool-execution subprocess
//! - [`ConversationStore`]: persisted conversation history
//! - [`TurnEvents`]: the UI that consumes a turn's output
//!
//! Tests swap any of them for scripted stand-ins.

pub mod error;
pub mod event;
pub mod framing;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{EventBus, TurnEvent, TurnEvents, TurnId};
pub use framing::LineFramer;
pub use message::{Message, Role};
pub use provider::{
    ChunkReceiver, CompletionRequest, CompletionResponse, Provider, StreamChunk, Usage,
};
pub use store::{ConversationRecord, ConversationStore, MessageRecord};
pub use tool::{ToolCallCandidate, ToolDescriptor, ToolSource};
