//! Conversation storage: the history collaborator.
//!
//! A conversation is a titled container of message records. One record holds
//! a whole completed turn: what the user said and what the assistant finally
//! answered. The model sees history as the flattened user/assistant pairs.

use crate::error::StoreError;
use crate::message::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Titles are cut to this many characters.
pub const TITLE_MAX_CHARS: usize = 25;

/// A stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// New conversation titled after its first user message.
    pub fn from_first_message(message: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title_from(message),
            created_at: Utc::now(),
        }
    }
}

/// One completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,

    /// The user's text
    pub message: String,

    /// The assistant's final text
    pub ai_response: String,

    /// Optional attachment reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        conversation_id: impl Into<String>,
        message: impl Into<String>,
        ai_response: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            message: message.into(),
            ai_response: ai_response.into(),
            file: None,
            created_at: Utc::now(),
        }
    }

    /// The record as the model sees it: a user message then the reply.
    pub fn to_history(&self) -> [Message; 2] {
        [
            Message::user(&self.message),
            Message::assistant(&self.ai_response),
        ]
    }
}

/// Flatten records (already in `created_at` order) into model history.
pub fn history_from_records(records: &[MessageRecord]) -> Vec<Message> {
    records.iter().flat_map(MessageRecord::to_history).collect()
}

/// First `TITLE_MAX_CHARS` characters of a message, trimmed.
pub fn title_from(message: &str) -> String {
    message.trim().chars().take(TITLE_MAX_CHARS).collect()
}

/// The ConversationStore trait.
///
/// Implementations: SQLite, in-memory (for testing).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// All conversations, newest first.
    async fn list_conversations(
        &self,
    ) -> std::result::Result<Vec<ConversationRecord>, StoreError>;

    /// Get a conversation by ID.
    async fn get_conversation(
        &self,
        id: &str,
    ) -> std::result::Result<Option<ConversationRecord>, StoreError>;

    /// Create a conversation.
    async fn add_conversation(&self, id: &str, title: &str)
    -> std::result::Result<(), StoreError>;

    /// Delete a conversation and all of its messages.
    async fn delete_conversation(&self, id: &str) -> std::result::Result<bool, StoreError>;

    /// Messages of a conversation ordered by `created_at`.
    async fn messages(
        &self,
        conversation_id: &str,
    ) -> std::result::Result<Vec<MessageRecord>, StoreError>;

    /// Append a message record.
    async fn add_message(&self, record: MessageRecord) -> std::result::Result<(), StoreError>;
}
