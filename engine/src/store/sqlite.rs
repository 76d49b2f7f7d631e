//! SQLite conversation store
//!
//! Each conversation is one row holding the JSON document, its revision and
//! its last-update time. Revision-guarded `UPDATE`s give the conditional
//! merge; unconditional writes re-read and retry when they lose a race.
//!
//! The connection pool runs in WAL mode so the HTTP read path does not
//! block on background turns writing their results.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::{OrchestratorError, Result};
use sdk::types::{Conversation, ConversationSummary, Message};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Row};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{ConversationPatch, ConversationStore};

/// Optimistic write attempts before reporting a conflict
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and run migrations
    ///
    /// Parent directories are created, WAL mode is enabled and SQLite
    /// replays any leftover WAL from an unclean shutdown on connect.
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL into the main database file
    pub async fn flush_wal(&self) -> anyhow::Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close all connections
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing database connection");

        self.flush_wal().await?;
        self.pool.close().await;

        info!("Database connection closed");
        Ok(())
    }
}

/// SQLite-backed [`ConversationStore`]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write `conversation` only if the row is still at `expected` revision.
    /// Returns false when another writer got there first.
    async fn write_if_unchanged(&self, conversation: &Conversation, expected: u64) -> Result<bool> {
        let document = encode(conversation)?;

        let result = sqlx::query(
            "UPDATE conversations SET document = ?, revision = ?, last_updated = ? WHERE id = ? AND revision = ?",
        )
        .bind(document)
        .bind(conversation.revision as i64)
        .bind(conversation.last_updated.timestamp_millis())
        .bind(&conversation.id)
        .bind(expected as i64)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    /// Shared read-modify-write loop for merge and append
    async fn update<F>(&self, id: &str, mut apply: F) -> Result<Conversation>
    where
        F: FnMut(&mut Conversation) -> Result<()> + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut conversation = self.load(id).await?;
            let current = conversation.revision;

            apply(&mut conversation)?;
            conversation.revision = current + 1;

            if self.write_if_unchanged(&conversation, current).await? {
                return Ok(conversation);
            }

            debug!(
                conversation_id = %id,
                attempt,
                "Concurrent write detected, re-reading conversation"
            );
        }

        warn!(conversation_id = %id, "Giving up after {} write attempts", MAX_WRITE_ATTEMPTS);
        Err(OrchestratorError::Conflict(format!(
            "conversation {} kept changing during write",
            id
        )))
    }
}

fn encode(conversation: &Conversation) -> Result<String> {
    serde_json::to_string(conversation)
        .map_err(|e| OrchestratorError::Store(format!("Failed to serialize conversation: {}", e)))
}

fn decode(document: &str, revision: i64) -> Result<Conversation> {
    let mut conversation: Conversation = serde_json::from_str(document)
        .map_err(|e| OrchestratorError::Store(format!("Corrupt conversation document: {}", e)))?;
    // The column is authoritative
    conversation.revision = revision as u64;
    Ok(conversation)
}

fn store_error(e: sqlx::Error) -> OrchestratorError {
    OrchestratorError::Store(e.to_string())
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load(&self, id: &str) -> Result<Conversation> {
        let row = sqlx::query("SELECT document, revision FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        match row {
            Some(r) => decode(&r.get::<String, _>("document"), r.get("revision")),
            None => Err(OrchestratorError::ConversationNotFound(id.to_string())),
        }
    }

    async fn create(&self) -> Result<Conversation> {
        let conversation = Conversation::new(uuid::Uuid::new_v4().to_string());
        let now = conversation.last_updated.timestamp_millis();

        sqlx::query(
            "INSERT INTO conversations (id, document, revision, created_at, last_updated) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(encode(&conversation)?)
        .bind(conversation.revision as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        debug!(conversation_id = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    async fn merge(&self, id: &str, patch: ConversationPatch) -> Result<Conversation> {
        self.update(id, |conversation| {
            patch.check_revision(id, conversation.revision)?;
            patch.apply_to(conversation);
            Ok(())
        })
        .await
    }

    async fn append_messages(&self, id: &str, messages: Vec<Message>) -> Result<Conversation> {
        self.update(id, |conversation| {
            conversation.messages.extend(messages.iter().cloned());
            conversation.last_updated = Utc::now();
            Ok(())
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT document, revision FROM conversations ORDER BY last_updated DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|r| decode(&r.get::<String, _>("document"), r.get("revision")))
            .map(|c| c.map(|c| c.summary()))
            .collect()
    }
}
