//! Shared fixtures for the engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use sdk::errors::{OrchestratorError, Result};
use sdk::types::{Action, Artifact, Conversation, Decision, Message, Phase, Plan};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use vibe_engine::capability::CapabilityClient;
use vibe_engine::config::GuardConfig;
use vibe_engine::executor::TurnExecutor;
use vibe_engine::guard::PhaseGuard;
use vibe_engine::store::{ConversationStore, InMemoryConversationStore};

/// Capability client replaying scripted answers in order
#[derive(Default)]
pub struct ScriptedCapabilities {
    decisions: Mutex<VecDeque<Result<Decision>>>,
    plans: Mutex<VecDeque<Result<Plan>>>,
    artifacts: Mutex<VecDeque<Result<Artifact>>>,
    gate: Option<Arc<Semaphore>>,

    pub decide_calls: AtomicUsize,
    pub plan_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,

    pub histories: Mutex<Vec<Vec<Message>>>,
    pub tasks: Mutex<Vec<String>>,
    pub steps: Mutex<Vec<String>>,
}

impl ScriptedCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(self, decision: Decision) -> Self {
        self.decisions.lock().unwrap().push_back(Ok(decision));
        self
    }

    pub fn decide_fails(self, cause: &str) -> Self {
        self.decisions
            .lock()
            .unwrap()
            .push_back(Err(OrchestratorError::capability("decide", cause)));
        self
    }

    pub fn plan(self, plan: Plan) -> Self {
        self.plans.lock().unwrap().push_back(Ok(plan));
        self
    }

    pub fn plan_fails(self, cause: &str) -> Self {
        self.plans
            .lock()
            .unwrap()
            .push_back(Err(OrchestratorError::capability("plan", cause)));
        self
    }

    pub fn generate(self, artifact: Artifact) -> Self {
        self.artifacts.lock().unwrap().push_back(Ok(artifact));
        self
    }

    /// Block every Decide call until a permit is added to `gate`
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn decide_count(&self) -> usize {
        self.decide_calls.load(Ordering::SeqCst)
    }

    pub fn plan_count(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn generate_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

fn exhausted(capability: &str) -> OrchestratorError {
    OrchestratorError::capability(capability, "script exhausted")
}

#[async_trait]
impl CapabilityClient for ScriptedCapabilities {
    async fn decide(&self, history: &[Message]) -> Result<Decision> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.decide_calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().unwrap().push(history.to_vec());
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("decide")))
    }

    async fn plan(&self, task: &str) -> Result<Plan> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().push(task.to_string());
        self.plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("plan")))
    }

    async fn generate(&self, step: &str) -> Result<Artifact> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.steps.lock().unwrap().push(step.to_string());
        self.artifacts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("generate")))
    }
}

pub fn architect(task: &str) -> Decision {
    Decision {
        action: Action::CallArchitect,
        text: Some("Let me get a plan drawn up.".to_string()),
        task: Some(task.to_string()),
    }
}

pub fn engineer() -> Decision {
    Decision {
        action: Action::CallEngineer,
        text: Some("Starting on the first step.".to_string()),
        task: None,
    }
}

pub fn executor(
    store: Arc<InMemoryConversationStore>,
    capabilities: Arc<ScriptedCapabilities>,
) -> Arc<TurnExecutor> {
    let guard = PhaseGuard::from_config(&GuardConfig::default()).unwrap();
    Arc::new(TurnExecutor::new(store, capabilities, Arc::new(guard)))
}

/// Seed a conversation with a two-message history in `phase`
pub async fn seed(
    store: &InMemoryConversationStore,
    id: &str,
    phase: Phase,
    plan: Option<Plan>,
) -> Conversation {
    let mut conversation = Conversation::new(id);
    conversation.messages = vec![
        Message::user("Build me a todo app"),
        Message::assistant(sdk::types::ReplyPayload::reply(
            "Before I hand this to the architect, shall I proceed?",
        )),
    ];
    conversation.phase = phase;
    conversation.plan = plan;
    store.insert(conversation.clone()).await;
    conversation
}

/// Poll until no message of `id` is still thinking
pub async fn wait_until_settled(store: &dyn ConversationStore, id: &str) -> Conversation {
    for _ in 0..200 {
        let conversation = store.load(id).await.unwrap();
        if !conversation.messages.iter().any(Message::is_thinking) {
            return conversation;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Placeholder never left the thinking state");
}
