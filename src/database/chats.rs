// ABOUTME: Database operations for chats and prompts with owner-scoped access
// ABOUTME: Every read and write is filtered by the owning user id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! Chat and prompt persistence.
//!
//! A chat is exclusively owned by its user; prompts are reached only
//! through an owned chat. Prompt ids may be client-generated (optimistic
//! UI), so prompt creation is idempotent on id.

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Maximum chats returned by a listing
const CHAT_LIST_LIMIT: i64 = 50;

/// Characters of the first prompt used to derive a chat title
const TITLE_LENGTH: usize = 50;

// ============================================================================
// Database Record Types
// ============================================================================

/// Database representation of a chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Unique chat ID (client- or server-generated, stable)
    pub id: String,
    /// User ID who owns the chat
    pub user_id: String,
    /// Title derived from the first prompt, None until derived
    pub title: Option<String>,
    /// When the chat was created (ISO 8601)
    pub created_at: String,
    /// When the chat was last updated (ISO 8601)
    pub updated_at: String,
}

/// Summary of a chat for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    /// Chat ID
    pub id: String,
    /// Chat title if derived
    pub title: Option<String>,
    /// When the chat was created
    pub created_at: String,
    /// When the chat was last updated
    pub updated_at: String,
}

/// Database representation of a prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    /// Unique prompt ID
    pub id: String,
    /// Chat this prompt belongs to
    pub chat_id: String,
    /// Prompt text content
    pub content: String,
    /// When the prompt was created (ISO 8601)
    pub created_at: String,
}

// ============================================================================
// Chat Store
// ============================================================================

/// Chat and prompt database operations
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    /// Create a new chat store
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Chat Operations
    // ========================================================================

    /// Create a new chat
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the id is taken.
    pub async fn create_chat(&self, user_id: &str, chat_id: Option<&str>) -> AppResult<ChatRecord> {
        let id = chat_id.map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned);
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO chats (id, user_id, title, created_at, updated_at)
            VALUES ($1, $2, NULL, $3, $3)
            ",
        )
        .bind(&id)
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create chat: {e}")))?;

        Ok(ChatRecord {
            id,
            user_id: user_id.to_owned(),
            title: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a chat by ID, scoped to its owner
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_chat(&self, chat_id: &str, user_id: &str) -> AppResult<Option<ChatRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, title, created_at, updated_at
            FROM chats
            WHERE id = $1 AND user_id = $2
            ",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get chat: {e}")))?;

        Ok(row.map(|r| ChatRecord {
            id: r.get("id"),
            user_id: r.get("user_id"),
            title: r.get("title"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// List a user's chats, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_chats(&self, user_id: &str) -> AppResult<Vec<ChatSummary>> {
        let rows = sqlx::query(
            r"
            SELECT id, title, created_at, updated_at
            FROM chats
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT $2
            ",
        )
        .bind(user_id)
        .bind(CHAT_LIST_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list chats: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|r| ChatSummary {
                id: r.get("id"),
                title: r.get("title"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    /// Delete a chat with its prompts and responses
    ///
    /// Returns false when the chat does not exist or is owned by another
    /// user. The cascade runs as explicit statements inside one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn delete_chat(&self, chat_id: &str, user_id: &str) -> AppResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        let owned = sqlx::query("SELECT 1 FROM chats WHERE id = $1 AND user_id = $2")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to check chat owner: {e}")))?;

        if owned.is_none() {
            return Ok(false);
        }

        sqlx::query(
            "DELETE FROM responses WHERE prompt_id IN (SELECT id FROM prompts WHERE chat_id = $1)",
        )
        .bind(chat_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to delete responses: {e}")))?;

        sqlx::query("DELETE FROM prompts WHERE chat_id = $1")
            .bind(chat_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete prompts: {e}")))?;

        sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(chat_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete chat: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit delete: {e}")))?;

        Ok(true)
    }

    // ========================================================================
    // Prompt Operations
    // ========================================================================

    /// Create a prompt in a chat, creating the chat on first submission
    ///
    /// Runs in one transaction: verifies ownership (creating the chat when
    /// the id is unknown), inserts the prompt idempotently, derives the
    /// chat title from the first prompt, and bumps `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when the chat exists but belongs to
    /// another user, `InvalidInput` when the prompt id is already bound to
    /// a different chat, or a database error.
    pub async fn create_prompt(
        &self,
        chat_id: &str,
        user_id: &str,
        content: &str,
        prompt_id: Option<&str>,
    ) -> AppResult<PromptRecord> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        let chat_row = sqlx::query("SELECT title FROM chats WHERE id = $1 AND user_id = $2")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to check chat: {e}")))?;

        let existing_title: Option<String> = match chat_row {
            Some(row) => row.get("title"),
            None => {
                // First prompt submission creates the chat, unless the id
                // exists under another owner.
                let taken = sqlx::query("SELECT 1 FROM chats WHERE id = $1")
                    .bind(chat_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| AppError::database(format!("Failed to check chat id: {e}")))?;
                if taken.is_some() {
                    return Err(AppError::not_found("Chat"));
                }

                sqlx::query(
                    r"
                    INSERT INTO chats (id, user_id, title, created_at, updated_at)
                    VALUES ($1, $2, NULL, $3, $3)
                    ",
                )
                .bind(chat_id)
                .bind(user_id)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::database(format!("Failed to create chat: {e}")))?;

                None
            }
        };

        let id = prompt_id.map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned);

        // Idempotent on client-generated ids: a duplicate submission keeps
        // the original row.
        sqlx::query(
            r"
            INSERT INTO prompts (id, chat_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(&id)
        .bind(chat_id)
        .bind(content)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to create prompt: {e}")))?;

        let prompt_row =
            sqlx::query("SELECT id, chat_id, content, created_at FROM prompts WHERE id = $1")
                .bind(&id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| AppError::database(format!("Failed to read prompt: {e}")))?;

        let record = PromptRecord {
            id: prompt_row.get("id"),
            chat_id: prompt_row.get("chat_id"),
            content: prompt_row.get("content"),
            created_at: prompt_row.get("created_at"),
        };

        if record.chat_id != chat_id {
            return Err(AppError::invalid_input(
                "promptId is already used by another chat",
            ));
        }

        if existing_title.is_none() {
            sqlx::query("UPDATE chats SET title = $1, updated_at = $2 WHERE id = $3")
                .bind(derive_title(content))
                .bind(&now)
                .bind(chat_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::database(format!("Failed to set chat title: {e}")))?;
        } else {
            sqlx::query("UPDATE chats SET updated_at = $1 WHERE id = $2")
                .bind(&now)
                .bind(chat_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::database(format!("Failed to touch chat: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit prompt: {e}")))?;

        Ok(record)
    }

    /// Get a prompt by ID within a chat
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_prompt(
        &self,
        prompt_id: &str,
        chat_id: &str,
    ) -> AppResult<Option<PromptRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, chat_id, content, created_at
            FROM prompts
            WHERE id = $1 AND chat_id = $2
            ",
        )
        .bind(prompt_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get prompt: {e}")))?;

        Ok(row.map(|r| PromptRecord {
            id: r.get("id"),
            chat_id: r.get("chat_id"),
            content: r.get("content"),
            created_at: r.get("created_at"),
        }))
    }

    /// All prompts of a chat in chronological order
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_prompts(&self, chat_id: &str) -> AppResult<Vec<PromptRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, chat_id, content, created_at
            FROM prompts
            WHERE chat_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list prompts: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|r| PromptRecord {
                id: r.get("id"),
                chat_id: r.get("chat_id"),
                content: r.get("content"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

/// Derive a chat title from the first prompt: first 50 characters, with an
/// ellipsis when truncated
fn derive_title(content: &str) -> String {
    let mut title: String = content.chars().take(TITLE_LENGTH).collect();
    if content.chars().count() > TITLE_LENGTH {
        title.push_str("...");
    }
    title
}
