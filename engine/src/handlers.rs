//! Command handlers for CLI operations
//!
//! - serve: Run the HTTP service
//! - chat: Run one synchronous turn
//! - conversations: List recent conversations
//! - show: Print one stored conversation

use anyhow::{Context, Result};
use sdk::errors::OrchestratorErrorExt;
use sdk::types::{MessageContent, MessageStatus};
use serde_json::json;
use std::sync::Arc;

use crate::api::{self, AppState};
use crate::capability::{CapabilityClient, HttpCapabilityClient};
use crate::config::{Config, StoreBackend};
use crate::executor::TurnExecutor;
use crate::guard::PhaseGuard;
use crate::store::{ConversationStore, Database, InMemoryConversationStore, SqliteConversationStore};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// An open conversation store, plus the database behind it when there is one
pub struct StoreHandle {
    pub store: Arc<dyn ConversationStore>,
    database: Option<Database>,
}

impl StoreHandle {
    /// Checkpoint the WAL and close the pool
    pub async fn close(self) -> Result<()> {
        if let Some(database) = self.database {
            database.close().await.context("Failed to close database")?;
        }
        Ok(())
    }
}

/// Open the configured conversation store
pub async fn open_store(config: &Config) -> Result<StoreHandle> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, conversations are lost on exit");
            Ok(StoreHandle {
                store: Arc::new(InMemoryConversationStore::new()),
                database: None,
            })
        }
        StoreBackend::Sqlite => {
            let database = Database::new(&config.store_path())
                .await
                .context("Failed to open database")?;
            Ok(StoreHandle {
                store: Arc::new(SqliteConversationStore::new(database.pool().clone())),
                database: Some(database),
            })
        }
    }
}

/// Wire store, capability client and guard into an executor
pub fn build_executor(config: &Config, store: Arc<dyn ConversationStore>) -> Result<Arc<TurnExecutor>> {
    let capabilities: Arc<dyn CapabilityClient> = Arc::new(
        HttpCapabilityClient::new(&config.capabilities)
            .context("Failed to create capability client")?,
    );

    let guard = Arc::new(PhaseGuard::from_config(&config.guard).context("Invalid guard phrases")?);

    Ok(Arc::new(TurnExecutor::new(store, capabilities, guard)))
}

/// Run the HTTP service until Ctrl-C, then close the store
pub async fn handle_serve(config: &Config) -> Result<()> {
    let handle = open_store(config).await?;
    let executor = build_executor(config, Arc::clone(&handle.store))?;
    let state = AppState::new(executor, config.server.mode);

    let served = api::serve(&config.server, state).await;
    handle.close().await?;
    served
}

/// Run one turn synchronously and print the reply
pub async fn handle_chat(
    message: String,
    conversation: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let handle = open_store(config).await?;
    let executor = build_executor(config, Arc::clone(&handle.store))?;

    let turn = executor.execute_turn(conversation.as_deref(), &message).await;
    handle.close().await?;

    let result = match turn {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Turn failed: {}", e);
            anyhow::bail!("{}", e.user_hint());
        }
    };

    match format {
        OutputFormat::Text => {
            println!("{}", result.payload.reply);

            if let Some(plan) = &result.payload.plan {
                println!();
                println!("Plan:");
                for (i, step) in plan.steps.iter().enumerate() {
                    println!("  {}. {}", i + 1, step);
                }
            }

            if let Some(code_file) = &result.payload.code_file {
                println!();
                println!("{}", code_file);
            }

            println!();
            println!("Conversation: {}", result.conversation_id);
        }
        OutputFormat::Json => {
            let output = json!({
                "reply": result.payload.reply,
                "plan": result.payload.plan,
                "code_file": result.payload.code_file,
                "conversation_id": result.conversation_id,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List recently updated conversations
pub async fn handle_conversations(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let handle = open_store(config).await?;

    let recent = handle.store.list_recent(limit).await;
    handle.close().await?;
    let recent = recent.context("Failed to list conversations")?;

    match format {
        OutputFormat::Text => {
            if recent.is_empty() {
                println!("No conversations yet");
                return Ok(());
            }

            println!("Recent conversations (last {}):", limit);
            println!();

            for summary in recent {
                println!("{}  {}", summary.id, summary.title);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "conversations": recent,
                "count": recent.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Print a stored conversation
pub async fn handle_show(id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let handle = open_store(config).await?;

    let conversation = handle.store.load(&id).await;
    handle.close().await?;
    let conversation =
        conversation.with_context(|| format!("Failed to load conversation {}", id))?;

    match format {
        OutputFormat::Text => {
            println!("Conversation: {}", conversation.id);
            println!("  State: {}", conversation.phase);
            println!(
                "  Updated: {}",
                conversation.last_updated.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(plan) = &conversation.plan {
                println!("  Plan: {} step(s)", plan.steps.len());
            }
            println!();

            for message in &conversation.messages {
                let marker = match message.status {
                    Some(MessageStatus::Thinking) => " (thinking)",
                    Some(MessageStatus::Error) => " (error)",
                    _ => "",
                };
                println!("[{}]{} {}", message.role, marker, message.content.as_text());

                if let MessageContent::Payload(payload) = &message.content {
                    if let Some(plan) = &payload.plan {
                        for (i, step) in plan.steps.iter().enumerate() {
                            println!("    {}. {}", i + 1, step);
                        }
                    }
                    if payload.code_file.is_some() {
                        println!("    (code file attached)");
                    }
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&conversation)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_store() {
        let mut config = Config::default_config();
        config.store.backend = StoreBackend::Memory;

        let handle = open_store(&config).await.unwrap();
        assert!(handle.store.list_recent(10).await.unwrap().is_empty());
        assert!(handle.database.is_none());
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_sqlite_store_in_temp_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default_config();
        config.store.path = Some(temp_dir.path().join("conversations.db"));

        let handle = open_store(&config).await.unwrap();
        let conversation = handle.store.create().await.unwrap();
        assert!(handle.store.load(&conversation.id).await.is_ok());
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_checkpoints_wal() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("conversations.db");
        let mut config = Config::default_config();
        config.store.path = Some(db_path.clone());

        let handle = open_store(&config).await.unwrap();
        let id = handle.store.create().await.unwrap().id;
        handle.close().await.unwrap();

        // Nothing left in the WAL once the store is closed
        let wal = temp_dir.path().join("conversations.db-wal");
        assert!(!wal.exists() || std::fs::metadata(&wal).unwrap().len() == 0);

        let reopened = open_store(&config).await.unwrap();
        assert!(reopened.store.load(&id).await.is_ok());
        reopened.close().await.unwrap();
    }
}
