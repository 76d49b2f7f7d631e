//! Conversation Store
//!
//! Uniform interface over the persisted conversation documents. Two
//! implementations satisfy it: an in-process map (tests, single-node demos)
//! and a SQLite document table (default).
//!
//! Writes are shallow merges on top-level fields: `messages` is replaced
//! wholesale by the caller's sequence, never appended server-side, except
//! through the dedicated `append_messages` primitive. Every write bumps the
//! conversation's `revision`; a patch carrying `expected_revision` is applied
//! only if nobody wrote in between, otherwise it fails with `Conflict`.

use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::{OrchestratorError, Result};
use sdk::types::{Conversation, ConversationSummary, Message, Phase, Plan};
use tracing::debug;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryConversationStore;
pub use sqlite::{Database, SqliteConversationStore};

/// Attempts made by [`commit`] before a conflict is surfaced
const MAX_COMMIT_ATTEMPTS: usize = 5;

/// Partial update of a conversation
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    pub messages: Option<Vec<Message>>,
    pub phase: Option<Phase>,
    /// `Some(None)` clears the stored plan
    pub plan: Option<Option<Plan>>,
    pub expected_revision: Option<u64>,
}

impl ConversationPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn plan(mut self, plan: Option<Plan>) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn expect_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    /// Shallow-apply onto `conversation` and refresh its timestamp.
    /// The revision is left to the store.
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(messages) = &self.messages {
            conversation.messages = messages.clone();
        }
        if let Some(phase) = self.phase {
            conversation.phase = phase;
        }
        if let Some(plan) = &self.plan {
            conversation.plan = plan.clone();
        }
        conversation.last_updated = Utc::now();
    }

    /// Reject the patch if it was computed against a stale revision
    pub fn check_revision(&self, id: &str, current: u64) -> Result<()> {
        match self.expected_revision {
            Some(expected) if expected != current => Err(OrchestratorError::Conflict(format!(
                "conversation {} is at revision {}, patch expected {}",
                id, current, expected
            ))),
            _ => Ok(()),
        }
    }
}

/// Persistence primitives for conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch a conversation by id
    async fn load(&self, id: &str) -> Result<Conversation>;

    /// Create an empty conversation with a fresh id
    async fn create(&self) -> Result<Conversation>;

    /// Shallow-merge `patch` into the stored conversation
    async fn merge(&self, id: &str, patch: ConversationPatch) -> Result<Conversation>;

    /// Atomically append messages to the stored history
    async fn append_messages(&self, id: &str, messages: Vec<Message>) -> Result<Conversation>;

    /// Most recently updated conversations first
    async fn list_recent(&self, limit: usize) -> Result<Vec<ConversationSummary>>;

    /// Load `id` when given and present, otherwise start a new conversation
    async fn load_or_create(&self, id: Option<&str>) -> Result<Conversation> {
        if let Some(id) = id {
            match self.load(id).await {
                Ok(conversation) => return Ok(conversation),
                Err(OrchestratorError::ConversationNotFound(_)) => {
                    debug!("Conversation {} not found, starting a new one", id);
                }
                Err(e) => return Err(e),
            }
        }
        self.create().await
    }
}

/// Read-modify-write with a conditional merge.
///
/// `mutate` runs against a fresh copy on every attempt, so it must be
/// repeatable. Conflicts caused by concurrent writers are retried.
pub async fn commit<F>(store: &dyn ConversationStore, id: &str, mut mutate: F) -> Result<Conversation>
where
    F: FnMut(&mut Conversation) -> Result<()> + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        let mut conversation = store.load(id).await?;
        let revision = conversation.revision;
        mutate(&mut conversation)?;

        let patch = ConversationPatch::new()
            .messages(conversation.messages)
            .phase(conversation.phase)
            .plan(conversation.plan)
            .expect_revision(revision);

        match store.merge(id, patch).await {
            Err(OrchestratorError::Conflict(reason)) if attempt < MAX_COMMIT_ATTEMPTS => {
                debug!(
                    conversation_id = %id,
                    attempt,
                    "Commit raced with another writer, retrying: {}",
                    reason
                );
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::ReplyPayload;

    #[test]
    fn test_patch_is_shallow() {
        let mut conv = Conversation::new("c1");
        conv.messages.push(Message::user("hi"));
        conv.phase = Phase::AwaitingPermission;
        let before = conv.last_updated;

        ConversationPatch::new()
            .plan(Some(Plan::new(["scaffold"])))
            .apply_to(&mut conv);

        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.phase, Phase::AwaitingPermission);
        assert_eq!(conv.plan, Some(Plan::new(["scaffold"])));
        assert!(conv.last_updated >= before);
    }

    #[test]
    fn test_patch_replaces_messages() {
        let mut conv = Conversation::new("c1");
        conv.messages.push(Message::user("first"));

        let replacement = vec![
            Message::user("one"),
            Message::assistant(ReplyPayload::reply("two")),
        ];
        ConversationPatch::new()
            .messages(replacement.clone())
            .apply_to(&mut conv);

        assert_eq!(conv.messages, replacement);
    }

    #[test]
    fn test_check_revision() {
        let patch = ConversationPatch::new().expect_revision(3);
        assert!(patch.check_revision("c1", 3).is_ok());
        assert!(matches!(
            patch.check_revision("c1", 4),
            Err(OrchestratorError::Conflict(_))
        ));
        assert!(ConversationPatch::new().check_revision("c1", 9).is_ok());
    }

    #[tokio::test]
    async fn test_commit_retries_after_conflict() {
        let store = InMemoryConversationStore::new();
        let conv = store.create().await.unwrap();

        let mut interfered = false;
        let committed = commit(&store, &conv.id, |c| {
            if !interfered {
                interfered = true;
                // Simulate another writer landing between load and merge
                let store = &store;
                let id = c.id.clone();
                futures::executor::block_on(async move {
                    store
                        .append_messages(&id, vec![Message::user("racing")])
                        .await
                })?;
            }
            c.messages.push(Message::user("mine"));
            Ok(())
        })
        .await
        .unwrap();

        let texts: Vec<_> = committed
            .messages
            .iter()
            .map(|m| m.content.as_text().to_string())
            .collect();
        assert_eq!(texts, vec!["racing", "mine"]);
    }
}
