//! In-process conversation store
//!
//! Keeps every conversation in a map behind an async lock. Nothing survives
//! a restart; used for tests and the `memory` store backend.

use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::{OrchestratorError, Result};
use sdk::types::{Conversation, ConversationSummary, Message};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ConversationPatch, ConversationStore};

/// Map-backed [`ConversationStore`]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a conversation as-is (tests)
    pub async fn insert(&self, conversation: Conversation) {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, id: &str) -> Result<Conversation> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::ConversationNotFound(id.to_string()))
    }

    async fn create(&self) -> Result<Conversation> {
        let conversation = Conversation::new(uuid::Uuid::new_v4().to_string());
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn merge(&self, id: &str, patch: ConversationPatch) -> Result<Conversation> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::ConversationNotFound(id.to_string()))?;

        patch.check_revision(id, conversation.revision)?;
        patch.apply_to(conversation);
        conversation.revision += 1;

        Ok(conversation.clone())
    }

    async fn append_messages(&self, id: &str, messages: Vec<Message>) -> Result<Conversation> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::ConversationNotFound(id.to_string()))?;

        conversation.messages.extend(messages);
        conversation.last_updated = Utc::now();
        conversation.revision += 1;

        Ok(conversation.clone())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        let conversations = self.conversations.read().await;
        let mut recent: Vec<&Conversation> = conversations.values().collect();
        recent.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

        Ok(recent
            .into_iter()
            .take(limit)
            .map(Conversation::summary)
            .collect())
    }
}
