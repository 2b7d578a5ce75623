// ABOUTME: Typed HTTP client for the chat API, shared by the CLI and the fan-out coordinator
// ABOUTME: Reuses the route DTOs so client and server stay wire-compatible by construction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! Typed API client

use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::Client;
use serde_json::json;

use crate::errors::{AppError, AppResult, ErrorCode, ErrorResponse};
use crate::routes::chats::{
    ChatDetailResponse, ChatListResponse, ChatView, CreateChatRequest, PromptResponse,
};

/// Raw byte stream of a submit response
pub type SubmitStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// HTTP client for the chat API
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Create a client for a server and bearer token
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Check server liveness
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable.
    pub async fn health(&self) -> AppResult<bool> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(connect_error)?;
        Ok(response.status().is_success())
    }

    /// Create a chat
    ///
    /// # Errors
    ///
    /// Returns the server's error for non-2xx responses.
    pub async fn create_chat(&self, chat_id: Option<&str>) -> AppResult<ChatView> {
        let request = CreateChatRequest {
            id: chat_id.map(ToOwned::to_owned),
        };
        let response = self
            .http
            .post(self.url("/api/chats"))
            .header("Authorization", self.bearer())
            .json(&request)
            .send()
            .await
            .map_err(connect_error)?;
        read_json(response).await
    }

    /// List the caller's chats
    ///
    /// # Errors
    ///
    /// Returns the server's error for non-2xx responses.
    pub async fn list_chats(&self) -> AppResult<ChatListResponse> {
        let response = self
            .http
            .get(self.url("/api/chats"))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(connect_error)?;
        read_json(response).await
    }

    /// Get a chat with its prompts and terminal responses
    ///
    /// # Errors
    ///
    /// Returns the server's error for non-2xx responses.
    pub async fn get_chat(&self, chat_id: &str) -> AppResult<ChatDetailResponse> {
        let response = self
            .http
            .get(self.url(&format!("/api/chats/{chat_id}")))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(connect_error)?;
        read_json(response).await
    }

    /// Delete a chat
    ///
    /// # Errors
    ///
    /// Returns the server's error for non-2xx responses.
    pub async fn delete_chat(&self, chat_id: &str) -> AppResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/chats/{chat_id}")))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(connect_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Submit a prompt to a chat
    ///
    /// # Errors
    ///
    /// Returns the server's error for non-2xx responses.
    pub async fn create_prompt(
        &self,
        chat_id: &str,
        content: &str,
        prompt_id: Option<&str>,
    ) -> AppResult<PromptResponse> {
        let mut body = json!({ "content": content });
        if let Some(id) = prompt_id {
            body["promptId"] = json!(id);
        }

        let response = self
            .http
            .post(self.url(&format!("/api/chats/{chat_id}/prompts")))
            .header("Authorization", self.bearer())
            .json(&body)
            .send()
            .await
            .map_err(connect_error)?;
        read_json(response).await
    }

    /// Open one provider's streaming submit call
    ///
    /// # Errors
    ///
    /// Returns the server's error (status mirrored) for non-2xx responses.
    pub async fn submit_stream(
        &self,
        chat_id: &str,
        provider: &str,
        prompt: &str,
        prompt_id: &str,
    ) -> AppResult<SubmitStream> {
        let response = self
            .http
            .post(self.url(&format!("/api/chats/{chat_id}/submit?provider={provider}")))
            .header("Authorization", self.bearer())
            .json(&json!({ "prompt": prompt, "promptId": prompt_id }))
            .send()
            .await
            .map_err(connect_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(Box::pin(response.bytes_stream()))
    }
}

fn connect_error(error: reqwest::Error) -> AppError {
    AppError::upstream("server", format!("Request failed: {error}"))
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> AppResult<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    response
        .json()
        .await
        .map_err(|e| AppError::new(ErrorCode::SerializationError, e.to_string()))
}

/// Rehydrate a server [`ErrorResponse`] into an `AppError`, keeping the
/// original HTTP status observable for classification
async fn error_from_response(response: reqwest::Response) -> AppError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let error = serde_json::from_str::<ErrorResponse>(&body).map_or_else(
        |_| AppError::new(ErrorCode::UpstreamError, format!("HTTP {status}")),
        |parsed| AppError::new(parsed.error.code, parsed.error.message),
    );

    if error.code == ErrorCode::UpstreamError {
        error.with_upstream_status(status)
    } else {
        error
    }
}
