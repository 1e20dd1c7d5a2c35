//! Turn event surface: what the UI collaborator observes during a turn.
//!
//! A turn publishes progress notes while a tool is being resolved, then text
//! chunks from the chat relay, then exactly one terminal event (`End` or
//! `Error`). Every event carries the turn id so a consumer can demultiplex
//! concurrent turns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Identifier threading all events of one user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Events emitted while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Status text while selecting or calling a tool
    ToolCallProgress { turn_id: TurnId, status: String },

    /// An incremental piece of the answer
    Chunk { turn_id: TurnId, text: String },

    /// The turn completed
    End { turn_id: TurnId },

    /// The turn failed
    Error { turn_id: TurnId, message: String },
}

impl TurnEvent {
    /// Returns the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ToolCallProgress { .. } => "tool_call_progress",
            Self::Chunk { .. } => "chunk",
            Self::End { .. } => "end",
            Self::Error { .. } => "error",
        }
    }

    pub fn turn_id(&self) -> TurnId {
        match self {
            Self::ToolCallProgress { turn_id, .. }
            | Self::Chunk { turn_id, .. }
            | Self::End { turn_id }
            | Self::Error { turn_id, .. } => *turn_id,
        }
    }

    /// `End` and `Error` close a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }
}

/// Sink for a turn's events.
pub trait TurnEvents: Send + Sync {
    fn notify_tool_call_progress(&self, turn_id: TurnId, status: &str);

    fn emit_chunk(&self, turn_id: TurnId, text: &str);

    fn emit_end(&self, turn_id: TurnId);

    fn emit_error(&self, turn_id: TurnId, message: &str);
}

/// A broadcast-based event bus for turn events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<TurnEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: TurnEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TurnEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TurnEvents for EventBus {
    fn notify_tool_call_progress(&self, turn_id: TurnId, status: &str) {
        self.publish(TurnEvent::ToolCallProgress {
            turn_id,
            status: status.to_string(),
        });
    }

    fn emit_chunk(&self, turn_id: TurnId, text: &str) {
        self.publish(TurnEvent::Chunk {
            turn_id,
            text: text.to_string(),
        });
    }

    fn emit_end(&self, turn_id: TurnId) {
        self.publish(TurnEvent::End { turn_id });
    }

    fn emit_error(&self, turn_id: TurnId, message: &str) {
        self.publish(TurnEvent::Error {
            turn_id,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let turn = TurnId::new();

        bus.emit_chunk(turn, "Hel");
        bus.emit_chunk(turn, "lo");
        bus.emit_end(turn);

        let first = rx.recv().await.unwrap();
        assert_eq!(
            *first,
            TurnEvent::Chunk {
                turn_id: turn,
                text: "Hel".into()
            }
        );
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "chunk");
        let last = rx.recv().await.unwrap();
        assert!(last.is_terminal());
        assert_eq!(last.turn_id(), turn);
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.emit_error(TurnId::new(), "no subscribers");
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = TurnEvent::ToolCallProgress {
            turn_id: TurnId::new(),
            status: "Calling ping".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_call_progress");
        assert_eq!(json["status"], "Calling ping");
        assert!(json["turn_id"].is_string());
    }
}
