//! Turn Executor
//!
//! Runs one full conversational turn:
//!
//! 1. Load the conversation (or start a new one)
//! 2. Append the user message
//! 3. Ask Decide what to do
//! 4. Run the decision through the [`PhaseGuard`]
//! 5. Dispatch: reply, plan-then-present, or generate
//! 6. Persist history, phase and plan in a single conditional merge
//!
//! Turns on the same conversation are serialized through
//! [`ConversationLocks`]. Steps 3 to 5 live in [`TurnExecutor::dispatch`]
//! so the async runner can reuse them against fresh history.

use sdk::errors::{OrchestratorError, OrchestratorErrorExt, Result};
use sdk::types::{Action, Decision, Message, Phase, Plan, ReplyPayload};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::capability::CapabilityClient;
use crate::guard::PhaseGuard;
use crate::store::{commit, ConversationStore};

/// Reply used when Generate returns no summary and Decide gave no text
const DEFAULT_ENGINEER_REPLY: &str = "Here is the generated code for the first step of the plan.";

/// Per-conversation turn locks
#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of conversation `id`.
    /// The lock is held until the returned guard is dropped.
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Result of a synchronous turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    pub conversation_id: String,
    pub payload: ReplyPayload,
}

/// What a dispatched decision produced, before anything is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Final assistant content for the turn
    pub payload: ReplyPayload,
    /// Plan presentation message appended ahead of the final reply
    pub intermediate: Option<Message>,
    /// Phase to store once the turn completes
    pub phase: Phase,
    /// Plan to store once the turn completes
    pub plan: Option<Plan>,
}

/// Runs turns against the store and the remote capabilities
pub struct TurnExecutor {
    store: Arc<dyn ConversationStore>,
    capabilities: Arc<dyn CapabilityClient>,
    guard: Arc<PhaseGuard>,
    locks: ConversationLocks,
}

impl TurnExecutor {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        capabilities: Arc<dyn CapabilityClient>,
        guard: Arc<PhaseGuard>,
    ) -> Self {
        Self {
            store,
            capabilities,
            guard,
            locks: ConversationLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn locks(&self) -> &ConversationLocks {
        &self.locks
    }

    /// Run one turn to completion and persist it
    ///
    /// On failure the user message is still stored (phase unchanged, no
    /// assistant message) and the typed error is returned.
    pub async fn execute_turn(
        &self,
        conversation_id: Option<&str>,
        user_message: &str,
    ) -> Result<TurnResult> {
        let start = Instant::now();
        let id = self.store.load_or_create(conversation_id).await?.id;

        let _turn = self.locks.acquire(&id).await;
        let conversation = self.store.load(&id).await?;

        info!(
            conversation_id = %id,
            phase = %conversation.phase,
            "Starting turn"
        );

        let user = Message::user(user_message);
        let mut history: Vec<Message> = conversation
            .messages
            .into_iter()
            .filter(|m| !m.is_thinking())
            .collect();
        history.push(user.clone());

        let outcome = match self
            .dispatch(&id, &history, conversation.phase, conversation.plan, user_message)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Keep the user's message even though the turn failed
                commit(self.store.as_ref(), &id, |c| {
                    c.messages.push(user.clone());
                    Ok(())
                })
                .await?;
                return Err(e);
            }
        };

        let reply = Message::assistant(outcome.payload.clone());
        commit(self.store.as_ref(), &id, |c| {
            c.messages.push(user.clone());
            if let Some(intermediate) = &outcome.intermediate {
                c.messages.push(intermediate.clone());
            }
            c.messages.push(reply.clone());
            c.phase = outcome.phase;
            c.plan = outcome.plan.clone();
            Ok(())
        })
        .await?;

        info!(
            conversation_id = %id,
            phase = %outcome.phase,
            "Turn completed in {}ms",
            start.elapsed().as_millis()
        );

        Ok(TurnResult {
            conversation_id: id,
            payload: outcome.payload,
        })
    }

    /// Decide, guard and dispatch against `history`, which must already end
    /// with the user's message. Nothing is written to the store.
    pub async fn dispatch(
        &self,
        conversation_id: &str,
        history: &[Message],
        phase: Phase,
        plan: Option<Plan>,
        user_text: &str,
    ) -> Result<DispatchOutcome> {
        let decision = self
            .capabilities
            .decide(history)
            .await
            .map_err(|e| self.report(conversation_id, e))?;

        let verdict = self.guard.evaluate(phase, user_text, decision);
        let action = verdict.decision.action;

        debug!(
            conversation_id = %conversation_id,
            action = %action,
            phase = %verdict.phase,
            overridden = verdict.overridden,
            "Dispatching decision"
        );

        match action {
            Action::ReplyToUser => Ok(DispatchOutcome {
                payload: ReplyPayload::reply(verdict.decision.text_or_empty()),
                intermediate: None,
                phase: self.guard.settle(verdict.phase, action),
                plan,
            }),

            Action::CallArchitect => {
                self.architect(conversation_id, history, &verdict.decision, user_text)
                    .await
                    .map(|(payload, intermediate, plan)| DispatchOutcome {
                        payload,
                        intermediate: Some(intermediate),
                        phase: self.guard.settle(verdict.phase, action),
                        plan: Some(plan),
                    })
            }

            Action::CallEngineer => {
                let step = plan
                    .as_ref()
                    .and_then(Plan::first_step)
                    .ok_or(OrchestratorError::MissingPlan)
                    .map_err(|e| self.report(conversation_id, e))?;

                let artifact = self
                    .capabilities
                    .generate(step)
                    .await
                    .map_err(|e| self.report(conversation_id, e))?;

                let reply = artifact
                    .summary
                    .clone()
                    .or_else(|| verdict.decision.text.clone())
                    .unwrap_or_else(|| DEFAULT_ENGINEER_REPLY.to_string());

                Ok(DispatchOutcome {
                    payload: ReplyPayload::reply(reply).with_code_file(artifact.code_file),
                    intermediate: None,
                    phase: self.guard.settle(verdict.phase, action),
                    plan,
                })
            }
        }
    }

    /// Plan, record the plan, then ask Decide to present it.
    ///
    /// The intermediate message only exists once Plan has succeeded.
    async fn architect(
        &self,
        conversation_id: &str,
        history: &[Message],
        decision: &Decision,
        user_text: &str,
    ) -> Result<(ReplyPayload, Message, Plan)> {
        let task = decision
            .task
            .as_deref()
            .or(decision.text.as_deref())
            .unwrap_or(user_text);

        let plan = self
            .capabilities
            .plan(task)
            .await
            .map_err(|e| self.report(conversation_id, e))?;

        info!(
            conversation_id = %conversation_id,
            "Plan produced with {} step(s)",
            plan.steps.len()
        );

        let intermediate = Message::assistant(
            ReplyPayload::reply(decision.text_or_empty()).with_plan(plan.clone()),
        );

        let mut extended = history.to_vec();
        extended.push(intermediate.clone());

        let presentation = self
            .capabilities
            .decide(&extended)
            .await
            .map_err(|e| self.report(conversation_id, e))?;

        let payload = ReplyPayload::reply(presentation.text_or_empty()).with_plan(plan.clone());
        Ok((payload, intermediate, plan))
    }

    fn report(&self, conversation_id: &str, e: OrchestratorError) -> OrchestratorError {
        error!(
            conversation_id = %conversation_id,
            capability = e.capability_name().unwrap_or("none"),
            recoverable = e.is_recoverable(),
            "Turn failed: {}",
            e
        );
        e
    }
}
