//! Async Turn Runner
//!
//! Non-blocking front for the [`TurnExecutor`]. `submit` stores the user
//! message together with a `thinking` placeholder and returns at once; a
//! detached task then runs the turn and finalizes the placeholder to
//! `complete` or `error`. Nothing is handed back to the caller. The stored
//! conversation is the only way to observe the result.
//!
//! Each background task answers the oldest placeholder still thinking once
//! it holds the conversation lock, not necessarily the one its own submit
//! stored. Turns are therefore answered in the order they were stored,
//! whichever task the scheduler runs first.

use sdk::errors::{OrchestratorError, OrchestratorErrorExt, Result};
use sdk::types::{Conversation, Message, MessageStatus, ReplyPayload, Role};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::executor::{DispatchOutcome, TurnExecutor};
use crate::store::commit;

/// Acknowledgement for a submitted turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub conversation_id: String,
    /// Id of the placeholder message that will carry the result
    pub placeholder_id: String,
}

/// Fire-and-forget turn runner
#[derive(Clone)]
pub struct AsyncTurnRunner {
    executor: Arc<TurnExecutor>,
}

impl AsyncTurnRunner {
    pub fn new(executor: Arc<TurnExecutor>) -> Self {
        Self { executor }
    }

    /// Record the user message and a placeholder, then run the turn in the
    /// background
    pub async fn submit(
        &self,
        conversation_id: Option<&str>,
        user_message: &str,
    ) -> Result<SubmitReceipt> {
        let store = self.executor.store();
        let id = store.load_or_create(conversation_id).await?.id;

        let user = Message::user(user_message);
        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id.clone();

        store.append_messages(&id, vec![user, placeholder]).await?;

        info!(conversation_id = %id, placeholder_id = %placeholder_id, "Turn submitted");

        let executor = Arc::clone(&self.executor);
        let task_id = id.clone();
        tokio::spawn(async move {
            run_in_background(executor, task_id).await;
        });

        Ok(SubmitReceipt {
            conversation_id: id,
            placeholder_id,
        })
    }
}

/// Oldest submitted turn that still awaits its answer
struct PendingTurn {
    placeholder_id: String,
    history: Vec<Message>,
    user_text: String,
}

/// Background half of a submitted turn. Always leaves a placeholder in a
/// terminal state unless the store itself is unreachable.
async fn run_in_background(executor: Arc<TurnExecutor>, conversation_id: String) {
    let _turn = executor.locks().acquire(&conversation_id).await;

    let conversation = match executor.store().load(&conversation_id).await {
        Ok(conversation) => conversation,
        Err(e) => {
            error!(conversation_id = %conversation_id, "Failed to load conversation: {}", e);
            return;
        }
    };

    let Some(pending) = next_pending(&conversation) else {
        debug!(conversation_id = %conversation_id, "No placeholder left to answer");
        return;
    };
    let placeholder_id = pending.placeholder_id.as_str();

    let result = executor
        .dispatch(
            &conversation_id,
            &pending.history,
            conversation.phase,
            conversation.plan.clone(),
            &pending.user_text,
        )
        .await;

    let finalized = match result {
        Ok(outcome) => match finalize(&executor, &conversation_id, placeholder_id, outcome).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    placeholder_id = %placeholder_id,
                    "Failed to store turn result, marking placeholder as failed: {}",
                    e
                );
                fail(&executor, &conversation_id, placeholder_id, e.user_hint()).await
            }
        },
        Err(e) => {
            warn!(
                conversation_id = %conversation_id,
                "Background turn failed: {}",
                e
            );
            fail(&executor, &conversation_id, placeholder_id, e.user_hint()).await
        }
    };

    if let Err(e) = finalized {
        error!(
            conversation_id = %conversation_id,
            placeholder_id = %placeholder_id,
            "Failed to finalize placeholder: {}",
            e
        );
    }
}

/// First thinking placeholder, the finalized messages before it and the
/// user text that opened its turn
fn next_pending(conversation: &Conversation) -> Option<PendingTurn> {
    let position = conversation.messages.iter().position(Message::is_thinking)?;
    let history = conversation.messages[..position].to_vec();

    let user_text = history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_text().to_string())
        .unwrap_or_default();

    Some(PendingTurn {
        placeholder_id: conversation.messages[position].id.clone(),
        history,
        user_text,
    })
}

async fn finalize(
    executor: &TurnExecutor,
    conversation_id: &str,
    placeholder_id: &str,
    outcome: DispatchOutcome,
) -> Result<()> {
    commit(executor.store().as_ref(), conversation_id, |c| {
        let position = placeholder_position(c, placeholder_id)?;
        c.messages[position].finalize(outcome.payload.clone(), MessageStatus::Complete);
        if let Some(intermediate) = &outcome.intermediate {
            c.messages.insert(position, intermediate.clone());
        }
        c.phase = outcome.phase;
        c.plan = outcome.plan.clone();
        Ok(())
    })
    .await?;

    info!(conversation_id = %conversation_id, "Background turn completed");
    Ok(())
}

async fn fail(
    executor: &TurnExecutor,
    conversation_id: &str,
    placeholder_id: &str,
    hint: &str,
) -> Result<()> {
    commit(executor.store().as_ref(), conversation_id, |c| {
        let position = placeholder_position(c, placeholder_id)?;
        c.messages[position].finalize(ReplyPayload::failure(hint), MessageStatus::Error);
        Ok(())
    })
    .await?;
    Ok(())
}

fn placeholder_position(conversation: &Conversation, placeholder_id: &str) -> Result<usize> {
    conversation
        .messages
        .iter()
        .position(|m| m.id == placeholder_id)
        .ok_or_else(|| {
            OrchestratorError::Store(format!("placeholder {} missing from conversation", placeholder_id))
        })
}
