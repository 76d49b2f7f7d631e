//! Integration tests for the Async Turn Runner
//!
//! Submission must return before any capability call completes; the stored
//! placeholder is the only channel for the result.

mod common;

use async_trait::async_trait;
use common::{architect, executor, seed, wait_until_settled, ScriptedCapabilities};
use sdk::errors::{OrchestratorError, Result};
use sdk::types::{
    Conversation, ConversationSummary, Decision, Message, MessageContent, MessageStatus, Phase,
    Plan, Role,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use vibe_engine::config::GuardConfig;
use vibe_engine::executor::TurnExecutor;
use vibe_engine::guard::PhaseGuard;
use vibe_engine::runner::AsyncTurnRunner;
use vibe_engine::store::{ConversationPatch, ConversationStore, InMemoryConversationStore};

#[tokio::test]
async fn test_submit_returns_before_decide_completes() {
    let store = Arc::new(InMemoryConversationStore::new());
    let gate = Arc::new(Semaphore::new(0));
    let caps = Arc::new(
        ScriptedCapabilities::new()
            .decide(Decision::reply("Hi! What would you like to build?"))
            .gated(Arc::clone(&gate)),
    );
    let runner = AsyncTurnRunner::new(executor(Arc::clone(&store), Arc::clone(&caps)));

    let receipt = runner.submit(None, "hello").await.unwrap();

    // Nothing has been decided yet
    assert_eq!(caps.decide_count(), 0);
    let pending = store.load(&receipt.conversation_id).await.unwrap();
    assert_eq!(pending.messages.len(), 2);
    assert_eq!(pending.messages[0].content.as_text(), "hello");
    assert_eq!(pending.messages[1].id, receipt.placeholder_id);
    assert_eq!(pending.messages[1].status, Some(MessageStatus::Thinking));

    gate.add_permits(1);

    let settled = wait_until_settled(store.as_ref(), &receipt.conversation_id).await;
    assert_eq!(settled.messages.len(), 2);
    let reply = &settled.messages[1];
    assert_eq!(reply.id, receipt.placeholder_id);
    assert_eq!(reply.status, Some(MessageStatus::Complete));
    assert_eq!(reply.content.as_text(), "Hi! What would you like to build?");
}

#[tokio::test]
async fn test_failure_finalizes_placeholder_as_error() {
    let store = Arc::new(InMemoryConversationStore::new());
    seed(&store, "c1", Phase::Clarifying, None).await;

    let caps = Arc::new(ScriptedCapabilities::new().decide_fails("dial tcp 10.0.0.7:443: refused"));
    let runner = AsyncTurnRunner::new(executor(Arc::clone(&store), caps));

    let receipt = runner.submit(Some("c1"), "hello?").await.unwrap();
    assert_eq!(receipt.conversation_id, "c1");

    let settled = wait_until_settled(store.as_ref(), "c1").await;
    assert_eq!(settled.messages.len(), 4);
    assert_eq!(settled.messages[2].role, Role::User);

    let placeholder = &settled.messages[3];
    assert_eq!(placeholder.status, Some(MessageStatus::Error));
    match &placeholder.content {
        MessageContent::Payload(p) => {
            let error = p.error.as_deref().unwrap();
            assert!(!error.contains("10.0.0.7"));
            assert_eq!(p.reply, error);
        }
        other => panic!("Expected error payload, got {:?}", other),
    }
    assert_eq!(settled.phase, Phase::Clarifying);
}

#[tokio::test]
async fn test_architect_path_inserts_intermediate_before_placeholder() {
    let store = Arc::new(InMemoryConversationStore::new());
    seed(&store, "c1", Phase::AwaitingPermission, None).await;

    let plan = Plan::new(["Scaffold", "Model", "UI"]);
    let caps = Arc::new(
        ScriptedCapabilities::new()
            .decide(architect("todo app"))
            .plan(plan.clone())
            .decide(Decision::reply("Three steps, scaffolding first.")),
    );
    let runner = AsyncTurnRunner::new(executor(Arc::clone(&store), Arc::clone(&caps)));

    let receipt = runner.submit(Some("c1"), "yep").await.unwrap();
    let settled = wait_until_settled(store.as_ref(), "c1").await;

    assert_eq!(settled.messages.len(), 5);
    match &settled.messages[3].content {
        MessageContent::Payload(p) => assert_eq!(p.plan.as_ref(), Some(&plan)),
        other => panic!("Expected intermediate plan payload, got {:?}", other),
    }

    let placeholder = &settled.messages[4];
    assert_eq!(placeholder.id, receipt.placeholder_id);
    assert_eq!(placeholder.status, Some(MessageStatus::Complete));
    assert_eq!(placeholder.content.as_text(), "Three steps, scaffolding first.");

    assert_eq!(settled.phase, Phase::Clarifying);
    assert_eq!(settled.plan, Some(plan));

    // Decide never saw the empty placeholder
    let histories = caps.histories.lock().unwrap();
    assert!(histories[0].iter().all(|m| !m.is_thinking()));
    assert_eq!(histories[0].len(), 3);
}

#[tokio::test]
async fn test_override_applies_in_background_turns() {
    let store = Arc::new(InMemoryConversationStore::new());
    let caps = Arc::new(ScriptedCapabilities::new().decide(architect("todo app")));
    let runner = AsyncTurnRunner::new(executor(Arc::clone(&store), Arc::clone(&caps)));

    let receipt = runner.submit(None, "Build me a todo app").await.unwrap();
    let settled = wait_until_settled(store.as_ref(), &receipt.conversation_id).await;

    assert_eq!(caps.plan_count(), 0);
    assert_eq!(settled.phase, Phase::AwaitingPermission);
    assert!(settled.messages[1]
        .content
        .as_text()
        .to_lowercase()
        .contains("shall i proceed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_back_to_back_submits_answered_in_order() {
    for _ in 0..10 {
        let store = Arc::new(InMemoryConversationStore::new());
        seed(&store, "c1", Phase::Clarifying, None).await;

        let caps = Arc::new(
            ScriptedCapabilities::new()
                .decide(Decision::reply("r1"))
                .decide(Decision::reply("r2")),
        );
        let runner = AsyncTurnRunner::new(executor(Arc::clone(&store), Arc::clone(&caps)));

        let submitting = tokio::spawn(async move {
            let first = runner.submit(Some("c1"), "first").await.unwrap();
            let second = runner.submit(Some("c1"), "second").await.unwrap();
            (first, second)
        });
        let (first, second) = submitting.await.unwrap();

        let settled = wait_until_settled(store.as_ref(), "c1").await;
        let texts: Vec<_> = settled.messages.iter().map(|m| m.content.as_text()).collect();
        assert_eq!(texts[2..], ["first", "r1", "second", "r2"]);
        assert_eq!(settled.messages[3].id, first.placeholder_id);
        assert_eq!(settled.messages[5].id, second.placeholder_id);

        let histories = caps.histories.lock().unwrap();
        assert_eq!(
            histories[0].last().map(|m| m.content.as_text()),
            Some("first")
        );
        let later: Vec<_> = histories[1].iter().map(|m| m.content.as_text()).collect();
        assert_eq!(later[2..], ["first", "r1", "second"]);
    }
}

/// In-memory store whose conditional merges keep conflicting for a while
struct ContendedStore {
    inner: InMemoryConversationStore,
    conflicts_left: AtomicUsize,
}

#[async_trait]
impl ConversationStore for ContendedStore {
    async fn load(&self, id: &str) -> Result<Conversation> {
        self.inner.load(id).await
    }

    async fn create(&self) -> Result<Conversation> {
        self.inner.create().await
    }

    async fn merge(&self, id: &str, patch: ConversationPatch) -> Result<Conversation> {
        let contended = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if contended {
            return Err(OrchestratorError::Conflict(format!("{} is busy", id)));
        }
        self.inner.merge(id, patch).await
    }

    async fn append_messages(&self, id: &str, messages: Vec<Message>) -> Result<Conversation> {
        self.inner.append_messages(id, messages).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        self.inner.list_recent(limit).await
    }
}

#[tokio::test]
async fn test_unsaved_result_marks_placeholder_as_error() {
    let store = Arc::new(ContendedStore {
        inner: InMemoryConversationStore::new(),
        // Every attempt of the first commit
        conflicts_left: AtomicUsize::new(5),
    });
    let caps = Arc::new(ScriptedCapabilities::new().decide(Decision::reply("Hello there")));
    let guard = PhaseGuard::from_config(&GuardConfig::default()).unwrap();
    let store_dyn: Arc<dyn ConversationStore> = store.clone();
    let runner = AsyncTurnRunner::new(Arc::new(TurnExecutor::new(
        store_dyn,
        caps,
        Arc::new(guard),
    )));

    let receipt = runner.submit(None, "hi").await.unwrap();
    let settled = wait_until_settled(store.as_ref(), &receipt.conversation_id).await;

    let placeholder = &settled.messages[1];
    assert_eq!(placeholder.id, receipt.placeholder_id);
    assert_eq!(placeholder.status, Some(MessageStatus::Error));
    assert_ne!(placeholder.content.as_text(), "Hello there");
    assert_eq!(store.conflicts_left.load(Ordering::SeqCst), 0);
}
