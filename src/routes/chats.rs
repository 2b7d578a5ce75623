// ABOUTME: Chat CRUD and prompt submission route handlers
// ABOUTME: All handlers authenticate a bearer JWT and scope reads/writes to its user
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! Chat routes
//!
//! Chat management for the comparison playground: create/list/get/delete
//! chats and submit prompts. The chat detail read returns every prompt
//! with its terminal provider responses — it is the reconciliation read
//! the fan-out client settles against.

use crate::{
    database::{ChatRecord, PromptRecord, ResponseRecord},
    errors::AppError,
    server::ServerResources,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a chat explicitly
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CreateChatRequest {
    /// Client-generated chat id, server-generated when omitted
    #[serde(default)]
    pub id: Option<String>,
}

/// A chat in API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatView {
    /// Chat id
    pub id: String,
    /// Title derived from the first prompt, null until derived
    pub title: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl From<ChatRecord> for ChatView {
    fn from(record: ChatRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Response for listing chats
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatListResponse {
    /// The caller's chats, most recently updated first
    pub chats: Vec<ChatView>,
    /// Number of chats returned
    pub total: usize,
}

/// A provider response in API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseView {
    /// Response id
    pub id: String,
    /// Provider that generated it
    pub provider: String,
    /// Model name
    pub model: Option<String>,
    /// Generated content
    pub content: Option<String>,
    /// `success` | `error`
    pub status: String,
    /// Error message for failed generations
    pub error_message: Option<String>,
    /// Generation latency in milliseconds
    pub latency_ms: Option<i64>,
    /// Tokens in the prompt
    pub prompt_tokens: i64,
    /// Tokens in the completion
    pub completion_tokens: i64,
    /// Total tokens
    pub total_tokens: i64,
    /// Cost in USD
    pub cost: f64,
    /// Creation timestamp
    pub created_at: String,
}

impl From<ResponseRecord> for ResponseView {
    fn from(record: ResponseRecord) -> Self {
        Self {
            id: record.id,
            provider: record.provider,
            model: record.model,
            content: record.content,
            status: record.status,
            error_message: record.error_message,
            latency_ms: record.latency_ms,
            prompt_tokens: record.prompt_tokens,
            completion_tokens: record.completion_tokens,
            total_tokens: record.total_tokens,
            cost: record.cost,
            created_at: record.created_at,
        }
    }
}

/// A prompt with its terminal responses
#[derive(Debug, Serialize, Deserialize)]
pub struct PromptView {
    /// Prompt id
    pub id: String,
    /// Prompt text
    pub content: String,
    /// Creation timestamp
    pub created_at: String,
    /// Terminal responses, one per provider that finished
    pub responses: Vec<ResponseView>,
}

/// Full chat detail: the reconciliation read
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatDetailResponse {
    /// Chat id
    pub id: String,
    /// Chat title
    pub title: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
    /// Prompts in chronological order
    pub prompts: Vec<PromptView>,
}

/// Response for prompt creation
#[derive(Debug, Serialize, Deserialize)]
pub struct PromptResponse {
    /// Prompt id (client-generated id echoed back when provided)
    pub id: String,
    /// Owning chat id
    pub chat_id: String,
    /// Prompt text
    pub content: String,
    /// Creation timestamp
    pub created_at: String,
}

impl From<PromptRecord> for PromptResponse {
    fn from(record: PromptRecord) -> Self {
        Self {
            id: record.id,
            chat_id: record.chat_id,
            content: record.content,
            created_at: record.created_at,
        }
    }
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/chats", post(Self::create_chat))
            .route("/api/chats", get(Self::list_chats))
            .route("/api/chats/:chat_id", get(Self::get_chat))
            .route("/api/chats/:chat_id", delete(Self::delete_chat))
            .route("/api/chats/:chat_id/prompts", post(Self::create_prompt))
            .with_state(resources)
    }

    /// Create a new chat
    async fn create_chat(
        State(resources): State<Arc<ServerResources>>,
        headers: axum::http::HeaderMap,
        body: Option<Json<CreateChatRequest>>,
    ) -> Result<Response, AppError> {
        let auth = resources.auth.authenticate(&headers)?;
        let request = body.map(|Json(r)| r).unwrap_or_default();

        let chat = resources
            .database
            .chats()
            .create_chat(&auth.user_id, request.id.as_deref())
            .await?;

        Ok((StatusCode::CREATED, Json(ChatView::from(chat))).into_response())
    }

    /// List the caller's chats
    async fn list_chats(
        State(resources): State<Arc<ServerResources>>,
        headers: axum::http::HeaderMap,
    ) -> Result<Response, AppError> {
        let auth = resources.auth.authenticate(&headers)?;

        let chats = resources.database.chats().list_chats(&auth.user_id).await?;
        let total = chats.len();
        let response = ChatListResponse {
            chats: chats
                .into_iter()
                .map(|c| ChatView {
                    id: c.id,
                    title: c.title,
                    created_at: c.created_at,
                    updated_at: c.updated_at,
                })
                .collect(),
            total,
        };

        Ok((StatusCode::OK, Json(response)).into_response())
    }

    /// Get a chat with its prompts and terminal responses
    async fn get_chat(
        State(resources): State<Arc<ServerResources>>,
        headers: axum::http::HeaderMap,
        Path(chat_id): Path<String>,
    ) -> Result<Response, AppError> {
        let auth = resources.auth.authenticate(&headers)?;

        let chat = resources
            .database
            .chats()
            .get_chat(&chat_id, &auth.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Chat"))?;

        let prompts = resources.database.chats().list_prompts(&chat_id).await?;
        let responses = resources.database.responses().list_for_chat(&chat_id).await?;

        // Group terminal responses under their prompts
        let mut by_prompt: HashMap<String, Vec<ResponseView>> = HashMap::new();
        for response in responses {
            by_prompt
                .entry(response.prompt_id.clone())
                .or_default()
                .push(ResponseView::from(response));
        }

        let response = ChatDetailResponse {
            id: chat.id,
            title: chat.title,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
            prompts: prompts
                .into_iter()
                .map(|p| PromptView {
                    responses: by_prompt.remove(&p.id).unwrap_or_default(),
                    id: p.id,
                    content: p.content,
                    created_at: p.created_at,
                })
                .collect(),
        };

        Ok((StatusCode::OK, Json(response)).into_response())
    }

    /// Delete a chat (cascades to prompts and responses)
    async fn delete_chat(
        State(resources): State<Arc<ServerResources>>,
        headers: axum::http::HeaderMap,
        Path(chat_id): Path<String>,
    ) -> Result<Response, AppError> {
        let auth = resources.auth.authenticate(&headers)?;

        let deleted = resources
            .database
            .chats()
            .delete_chat(&chat_id, &auth.user_id)
            .await?;

        if !deleted {
            return Err(AppError::not_found("Chat"));
        }

        Ok((StatusCode::NO_CONTENT, ()).into_response())
    }

    /// Submit a prompt to a chat
    ///
    /// Creates the chat on first submission, derives its title from the
    /// first prompt, and is idempotent on client-generated prompt ids.
    async fn create_prompt(
        State(resources): State<Arc<ServerResources>>,
        headers: axum::http::HeaderMap,
        Path(chat_id): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> Result<Response, AppError> {
        let auth = resources.auth.authenticate(&headers)?;

        let content = body
            .get("content")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AppError::missing_field("content"))?;
        if content.trim().is_empty() {
            return Err(AppError::invalid_input("Prompt cannot be empty"));
        }
        let prompt_id = body.get("promptId").and_then(serde_json::Value::as_str);

        let prompt = resources
            .database
            .chats()
            .create_prompt(&chat_id, &auth.user_id, content, prompt_id)
            .await?;

        Ok((StatusCode::CREATED, Json(PromptResponse::from(prompt))).into_response())
    }
}
