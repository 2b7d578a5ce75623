// ABOUTME: The streaming submit endpoint: one provider generation per call
// ABOUTME: Validates ownership, consults the cache guard, then streams text plus trailer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! Streaming submit route
//!
//! `POST /api/chats/:chat_id/submit?provider=<id>` with body
//! `{"prompt": "...", "promptId": "..."}`. The response is
//! `Content-Type: text/plain`: the generated text streamed incrementally,
//! terminated by the metadata trailer. Identical repeated requests replay
//! the stored response without a second upstream call; a concurrent
//! duplicate gets 409 while the winner's generation is in flight.

use crate::{
    database::CacheDecision,
    errors::AppError,
    server::ServerResources,
    services::{replay_cached, stream_generation},
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Query parameters for the submit endpoint
#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    /// Provider id; must be one of the registered identifiers
    #[serde(default)]
    pub provider: Option<String>,
}

/// Create the submit route
pub fn routes(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/api/chats/:chat_id/submit", post(submit))
        .with_state(resources)
}

/// Stream one provider's response for a prompt
async fn submit(
    State(resources): State<Arc<ServerResources>>,
    headers: axum::http::HeaderMap,
    Path(chat_id): Path<String>,
    Query(query): Query<SubmitQuery>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, AppError> {
    let auth = resources.auth.authenticate(&headers)?;

    let provider_id = query
        .provider
        .as_deref()
        .ok_or_else(|| AppError::unknown_provider("none"))?;
    let entry = resources.registry.resolve(provider_id)?.clone();

    let prompt = body
        .get("prompt")
        .and_then(serde_json::Value::as_str)
        .filter(|p| !p.is_empty());
    let prompt_id = body
        .get("promptId")
        .and_then(serde_json::Value::as_str)
        .filter(|p| !p.is_empty());
    let (Some(prompt), Some(prompt_id)) = (prompt, prompt_id) else {
        return Err(AppError::invalid_input("Prompt and promptId are required"));
    };

    // Ownership preconditions, verified in parallel: the chat must belong
    // to the caller and the prompt must live under that chat.
    let chats = resources.database.chats();
    let (chat, prompt_record) = tokio::try_join!(
        chats.get_chat(&chat_id, &auth.user_id),
        chats.get_prompt(prompt_id, &chat_id),
    )?;
    if chat.is_none() {
        return Err(AppError::not_found("Chat"));
    }
    if prompt_record.is_none() {
        return Err(AppError::not_found("Prompt"));
    }

    let decision = resources
        .database
        .responses()
        .check_or_reserve(prompt_id, entry.id)
        .await?;

    let body = match decision {
        CacheDecision::Cached(record) => {
            info!(
                provider = entry.id,
                prompt_id, "Serving cached response without upstream call"
            );
            replay_cached(&record)
        }
        CacheDecision::InFlight => {
            return Err(AppError::generation_in_progress(prompt_id, entry.id));
        }
        CacheDecision::Proceed(reservation) => {
            stream_generation(entry, reservation, prompt_id.to_owned(), prompt.to_owned()).await?
        }
    };

    text_stream_response(body)
}

/// Wrap a body as a plain-text streaming response
fn text_stream_response(body: Body) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(body)
        .map_err(|e| AppError::internal(format!("Failed to build response: {e}")))
}
