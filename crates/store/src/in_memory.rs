//! In-memory store: useful for testing and one-off sessions.

use async_trait::async_trait;
use overlay_core::error::StoreError;
use overlay_core::store::{ConversationRecord, ConversationStore, MessageRecord};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    conversations: Vec<ConversationRecord>,
    messages: Vec<MessageRecord>,
}

/// A store that keeps conversations in Vecs.
/// Useful for testing and sessions where persistence isn't needed.
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut conversations = tables.conversations.clone();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn add_conversation(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.conversations.iter().any(|c| c.id == id) {
            return Err(StoreError::Storage(format!("conversation {id} already exists")));
        }
        tables.conversations.push(ConversationRecord {
            id: id.to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.conversations.len();
        tables.conversations.retain(|c| c.id != id);
        let removed = tables.conversations.len() < before;
        tables.messages.retain(|m| m.conversation_id != id);
        Ok(removed)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut messages: Vec<MessageRecord> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn add_message(&self, record: MessageRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables
            .conversations
            .iter()
            .any(|c| c.id == record.conversation_id)
        {
            return Err(StoreError::ConversationNotFound(record.conversation_id));
        }
        tables.messages.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_list_messages_in_order() {
        let store = InMemoryStore::new();
        store.add_conversation("c1", "Clock widget").await.unwrap();
        store
            .add_message(MessageRecord::new("c1", "first", "one"))
            .await
            .unwrap();
        store
            .add_message(MessageRecord::new("c1", "second", "two"))
            .await
            .unwrap();

        let messages = store.messages("c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message, "first");
        assert_eq!(messages[1].ai_response, "two");
    }

    #[tokio::test]
    async fn message_for_unknown_conversation_is_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .add_message(MessageRecord::new("ghost", "hi", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let store = InMemoryStore::new();
        store.add_conversation("c1", "t").await.unwrap();
        store
            .add_message(MessageRecord::new("c1", "hi", "hello"))
            .await
            .unwrap();

        assert!(store.delete_conversation("c1").await.unwrap());
        assert!(!store.delete_conversation("c1").await.unwrap());
        assert!(store.messages("c1").await.unwrap().is_empty());
        assert!(store.get_conversation("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_conversation_is_an_error() {
        let store = InMemoryStore::new();
        store.add_conversation("c1", "t").await.unwrap();
        assert!(store.add_conversation("c1", "t").await.is_err());
    }

    #[tokio::test]
    async fn backend_name() {
        assert_eq!(InMemoryStore::new().name(), "in_memory");
    }
}
