// ABOUTME: Database management: pool setup, schema migration, and store accessors
// ABOUTME: SQLite via sqlx with inline CREATE TABLE IF NOT EXISTS migrations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Database Management
//!
//! Owns the SQLite pool and the schema. Access goes through per-aggregate
//! stores: [`ChatStore`] for chats and prompts, [`ResponseStore`] for
//! provider responses and the idempotency guard.

pub mod chats;
pub mod responses;

pub use chats::{ChatRecord, ChatStore, ChatSummary, PromptRecord};
pub use responses::{CacheDecision, ResponseRecord, ResponseReservation, ResponseStore};

use crate::errors::AppResult;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Database manager for chats, prompts, and responses
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or migration fails.
    pub async fn new(database_url: &str) -> AppResult<Self> {
        // Ensure SQLite creates the database file if it doesn't exist
        let connection_options = if database_url.starts_with("sqlite:") && !is_memory(database_url)
        {
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_owned()
        };

        // An in-memory SQLite database exists per connection, so the pool
        // must stay at a single connection or each one sees an empty schema.
        let max_connections = if is_memory(database_url) { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&connection_options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if DDL execution fails.
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, updated_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (chat_id) REFERENCES chats (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_prompts_chat ON prompts(chat_id, created_at)")
            .execute(&self.pool)
            .await?;

        // The UNIQUE(prompt_id, provider) constraint is what closes the
        // check-then-act race in the idempotency guard: reservations are
        // inserted with ON CONFLICT DO NOTHING and only the winner proceeds
        // to generate.
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS responses (
                id TEXT PRIMARY KEY,
                prompt_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT,
                content TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                latency_ms INTEGER,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (prompt_id) REFERENCES prompts (id) ON DELETE CASCADE,
                UNIQUE (prompt_id, provider)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_responses_prompt ON responses(prompt_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get the underlying pool
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Chat and prompt operations
    #[must_use]
    pub fn chats(&self) -> ChatStore {
        ChatStore::new(self.pool.clone())
    }

    /// Response operations and the idempotency guard
    #[must_use]
    pub fn responses(&self) -> ResponseStore {
        ResponseStore::new(self.pool.clone())
    }
}

fn is_memory(database_url: &str) -> bool {
    database_url.contains(":memory:")
}
