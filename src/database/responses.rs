// ABOUTME: Response persistence and the at-most-once idempotency guard
// ABOUTME: Reservation rows inserted under a unique constraint decide who may generate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Response Store and Cache Guard
//!
//! For a given (prompt, provider) pair there is at most one response row,
//! and once that row is `success` it is never regenerated — later requests
//! replay the stored content instead of calling the upstream model.
//!
//! The guard enforces this at the storage layer: `check_or_reserve` tries
//! to insert a `pending` reservation row under the `UNIQUE(prompt_id,
//! provider)` constraint with `ON CONFLICT DO NOTHING`. Exactly one of two
//! concurrent duplicate requests wins the insert; the loser observes the
//! existing row. `error` rows are deleted so failed attempts never block a
//! retry, and `pending` rows older than the stale threshold (a crashed
//! server, or a teardown whose release was lost) are reclaimed.

use crate::errors::{AppError, AppResult};
use crate::wire::UsageMetadata;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

/// Age after which a `pending` reservation is considered abandoned
const STALE_RESERVATION_SECS: i64 = 300;

/// Attempts to win a reservation before conceding `InFlight`
const RESERVE_ATTEMPTS: u32 = 3;

// ============================================================================
// Record Types
// ============================================================================

/// Terminal status values of a response row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Reservation held while a generation is in flight
    Pending,
    /// Generation completed and content is stored
    Success,
    /// Generation failed; the row is cleared on the next retry
    Error,
}

impl ResponseStatus {
    /// String representation stored in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Database representation of a provider response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Unique response ID
    pub id: String,
    /// Prompt this response answers
    pub prompt_id: String,
    /// Provider that generated it
    pub provider: String,
    /// Model name shown to users
    pub model: Option<String>,
    /// Generated content (opaque to this subsystem; may be encrypted at rest)
    pub content: Option<String>,
    /// `pending` | `success` | `error`
    pub status: String,
    /// Error message for `error` rows
    pub error_message: Option<String>,
    /// Wall-clock generation latency in milliseconds
    pub latency_ms: Option<i64>,
    /// Tokens in the prompt
    pub prompt_tokens: i64,
    /// Tokens in the completion
    pub completion_tokens: i64,
    /// Total tokens
    pub total_tokens: i64,
    /// Cost in USD
    pub cost: f64,
    /// When the row was created (ISO 8601)
    pub created_at: String,
}

impl From<&ResponseRecord> for UsageMetadata {
    fn from(record: &ResponseRecord) -> Self {
        Self {
            prompt_tokens: record.prompt_tokens.max(0) as u32,
            completion_tokens: record.completion_tokens.max(0) as u32,
            total_tokens: record.total_tokens.max(0) as u32,
            cost: record.cost,
        }
    }
}

/// Outcome of consulting the cache guard for a (prompt, provider) pair
pub enum CacheDecision {
    /// A `success` row exists; replay it without touching the upstream
    Cached(ResponseRecord),
    /// Another request holds a fresh reservation for this pair
    InFlight,
    /// The caller won the reservation and must generate
    Proceed(ResponseReservation),
}

/// A held reservation for one (prompt, provider) generation
///
/// Exactly one terminal transition runs per reservation: [`complete`],
/// [`fail`], or [`release`]. Each is guarded by `status = 'pending'`, so a
/// transition that lost its row (stale reclaim) is a no-op.
///
/// [`complete`]: ResponseReservation::complete
/// [`fail`]: ResponseReservation::fail
/// [`release`]: ResponseReservation::release
pub struct ResponseReservation {
    pool: SqlitePool,
    response_id: String,
}

/// Final figures recorded for a completed generation
#[derive(Debug, Clone)]
pub struct CompletedResponse<'a> {
    /// Model name shown to users
    pub model: &'a str,
    /// Full generated text
    pub content: &'a str,
    /// Wall-clock latency in milliseconds
    pub latency_ms: u64,
    /// Usage and cost figures
    pub usage: UsageMetadata,
}

impl ResponseReservation {
    /// Mark the reservation successful with its content and figures
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn complete(&self, response: CompletedResponse<'_>) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE responses
            SET status = 'success', model = $1, content = $2, latency_ms = $3,
                prompt_tokens = $4, completion_tokens = $5, total_tokens = $6, cost = $7
            WHERE id = $8 AND status = 'pending'
            ",
        )
        .bind(response.model)
        .bind(response.content)
        .bind(response.latency_ms as i64)
        .bind(i64::from(response.usage.prompt_tokens))
        .bind(i64::from(response.usage.completion_tokens))
        .bind(i64::from(response.usage.total_tokens))
        .bind(response.usage.cost)
        .bind(&self.response_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record response: {e}")))?;

        if result.rows_affected() == 0 {
            debug!(
                "Reservation {} no longer pending, success not recorded",
                self.response_id
            );
        }
        Ok(())
    }

    /// Mark the reservation failed so the guard can clear it on retry
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn fail(&self, model: &str, error_message: &str) -> AppResult<()> {
        sqlx::query(
            r"
            UPDATE responses
            SET status = 'error', model = $1, error_message = $2
            WHERE id = $3 AND status = 'pending'
            ",
        )
        .bind(model)
        .bind(error_message)
        .bind(&self.response_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record error: {e}")))?;
        Ok(())
    }

    /// Delete the reservation, allowing an immediate retry
    ///
    /// Used when a generation is torn down by client disconnect: partial
    /// content is discarded, never persisted as complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn release(&self) -> AppResult<()> {
        sqlx::query("DELETE FROM responses WHERE id = $1 AND status = 'pending'")
            .bind(&self.response_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to release reservation: {e}")))?;
        Ok(())
    }
}

// ============================================================================
// Response Store
// ============================================================================

/// Response database operations
pub struct ResponseStore {
    pool: SqlitePool,
}

impl ResponseStore {
    /// Create a new response store
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Consult the idempotency guard for a (prompt, provider) pair
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails.
    pub async fn check_or_reserve(
        &self,
        prompt_id: &str,
        provider: &str,
    ) -> AppResult<CacheDecision> {
        for _ in 0..RESERVE_ATTEMPTS {
            let id = Uuid::new_v4().to_string();
            let now = chrono::Utc::now().to_rfc3339();

            let inserted = sqlx::query(
                r"
                INSERT INTO responses (id, prompt_id, provider, status, created_at)
                VALUES ($1, $2, $3, 'pending', $4)
                ON CONFLICT (prompt_id, provider) DO NOTHING
                ",
            )
            .bind(&id)
            .bind(prompt_id)
            .bind(provider)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to reserve response: {e}")))?;

            if inserted.rows_affected() > 0 {
                return Ok(CacheDecision::Proceed(ResponseReservation {
                    pool: self.pool.clone(),
                    response_id: id,
                }));
            }

            let Some(existing) = self.get_for_pair(prompt_id, provider).await? else {
                // Deleted between our insert and read; try again
                continue;
            };

            match existing.status.as_str() {
                "success" => return Ok(CacheDecision::Cached(existing)),
                "error" => {
                    // Failed attempts never block a retry
                    debug!(
                        "Clearing error response for prompt {prompt_id} provider {provider}"
                    );
                    self.delete_with_status(&existing.id, ResponseStatus::Error)
                        .await?;
                }
                _ => {
                    if reservation_is_stale(&existing.created_at) {
                        debug!(
                            "Reclaiming stale reservation for prompt {prompt_id} provider {provider}"
                        );
                        self.delete_with_status(&existing.id, ResponseStatus::Pending)
                            .await?;
                    } else {
                        return Ok(CacheDecision::InFlight);
                    }
                }
            }
        }

        // Persistent contention: treat as in flight rather than spinning
        Ok(CacheDecision::InFlight)
    }

    /// Get the response row for a (prompt, provider) pair
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn get_for_pair(
        &self,
        prompt_id: &str,
        provider: &str,
    ) -> AppResult<Option<ResponseRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, prompt_id, provider, model, content, status, error_message,
                   latency_ms, prompt_tokens, completion_tokens, total_tokens, cost, created_at
            FROM responses
            WHERE prompt_id = $1 AND provider = $2
            ",
        )
        .bind(prompt_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get response: {e}")))?;

        Ok(row.map(map_response_row))
    }

    /// Terminal responses for every prompt of a chat
    ///
    /// `pending` reservations are invisible to readers: clients reconcile
    /// against exactly the set of terminal records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_for_chat(&self, chat_id: &str) -> AppResult<Vec<ResponseRecord>> {
        let rows = sqlx::query(
            r"
            SELECT r.id, r.prompt_id, r.provider, r.model, r.content, r.status,
                   r.error_message, r.latency_ms, r.prompt_tokens, r.completion_tokens,
                   r.total_tokens, r.cost, r.created_at
            FROM responses r
            JOIN prompts p ON p.id = r.prompt_id
            WHERE p.chat_id = $1 AND r.status != 'pending'
            ORDER BY r.id ASC
            ",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list responses: {e}")))?;

        Ok(rows.into_iter().map(map_response_row).collect())
    }

    /// Terminal responses for one prompt
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_for_prompt(&self, prompt_id: &str) -> AppResult<Vec<ResponseRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, prompt_id, provider, model, content, status, error_message,
                   latency_ms, prompt_tokens, completion_tokens, total_tokens, cost, created_at
            FROM responses
            WHERE prompt_id = $1 AND status != 'pending'
            ORDER BY id ASC
            ",
        )
        .bind(prompt_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list responses: {e}")))?;

        Ok(rows.into_iter().map(map_response_row).collect())
    }

    /// Delete a row only while it still has the expected status
    async fn delete_with_status(&self, response_id: &str, status: ResponseStatus) -> AppResult<()> {
        sqlx::query("DELETE FROM responses WHERE id = $1 AND status = $2")
            .bind(response_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete response: {e}")))?;
        Ok(())
    }
}

fn map_response_row(row: sqlx::sqlite::SqliteRow) -> ResponseRecord {
    ResponseRecord {
        id: row.get("id"),
        prompt_id: row.get("prompt_id"),
        provider: row.get("provider"),
        model: row.get("model"),
        content: row.get("content"),
        status: row.get("status"),
        error_message: row.get("error_message"),
        latency_ms: row.get("latency_ms"),
        prompt_tokens: row.get("prompt_tokens"),
        completion_tokens: row.get("completion_tokens"),
        total_tokens: row.get("total_tokens"),
        cost: row.get("cost"),
        created_at: row.get("created_at"),
    }
}

/// Whether a `pending` reservation is old enough to reclaim
fn reservation_is_stale(created_at: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(created_at).is_ok_and(|created| {
        let age = chrono::Utc::now().signed_duration_since(created);
        age.num_seconds() > STALE_RESERVATION_SECS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_detection() {
        let fresh = chrono::Utc::now().to_rfc3339();
        assert!(!reservation_is_stale(&fresh));

        let old = (chrono::Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
        assert!(reservation_is_stale(&old));

        // Unparseable timestamps are never reclaimed
        assert!(!reservation_is_stale("not-a-timestamp"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(ResponseStatus::Pending.as_str(), "pending");
        assert_eq!(ResponseStatus::Success.as_str(), "success");
        assert_eq!(ResponseStatus::Error.as_str(), "error");
    }
}
