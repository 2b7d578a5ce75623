// ABOUTME: Streaming text generator for OpenAI-compatible chat completion APIs
// ABOUTME: Serves both the OpenAI and xAI registry entries via per-entry base URL and key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # OpenAI-Compatible Generator
//!
//! Implementation of [`TextGenerator`] for any `/chat/completions` API
//! speaking the OpenAI wire format (OpenAI itself, xAI, and most gateway
//! deployments). Streaming requests set `stream_options.include_usage` so
//! the provider appends its usage report as a final SSE event.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use super::sse_parser::create_sse_stream;
use super::{GenerationRequest, GenerationStream, StreamChunk, TextGenerator, TokenUsage};
use crate::errors::AppError;

// ============================================================================
// API Request/Response Types
// ============================================================================

/// Chat completion request (OpenAI wire format)
#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Message structure for the chat completions API
#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// Stream options requesting a usage report on the final event
#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

/// Streaming chunk structure
#[derive(Debug, Deserialize)]
struct CompletionStreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

/// Choice in a streaming chunk
#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

/// Delta content in a streaming chunk
#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Usage statistics in the final streaming event
#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// API error response
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail structure
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// Generator Implementation
// ============================================================================

/// Configuration for an OpenAI-compatible deployment
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// API base URL (e.g. `https://api.openai.com/v1`)
    pub base_url: String,
    /// Bearer API key
    pub api_key: String,
    /// Provider name for logs and error messages
    pub provider_name: &'static str,
}

/// Text generator for OpenAI-compatible chat completion APIs
pub struct OpenAiCompatibleGenerator {
    client: Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleGenerator {
    /// Create a new generator for a configured deployment
    #[must_use]
    pub fn new(config: OpenAiCompatibleConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    /// Map an error response body into the taxonomy, mirroring the status
    fn parse_error_response(&self, status: reqwest::StatusCode, body: &str) -> AppError {
        let message = serde_json::from_str::<ApiErrorResponse>(body).map_or_else(
            |_| body.chars().take(200).collect::<String>(),
            |parsed| parsed.error.message,
        );

        if status.as_u16() == 429 {
            return AppError::upstream_rate_limited().with_upstream_status(429);
        }

        AppError::upstream(self.config.provider_name, message)
            .with_upstream_status(status.as_u16())
    }

    /// Parse one SSE data payload into a stream chunk
    fn parse_stream_data(provider_name: &'static str, json_str: &str) -> Option<StreamChunk> {
        match serde_json::from_str::<CompletionStreamChunk>(json_str) {
            Ok(chunk) => {
                // The usage report arrives as a choiceless final event when
                // include_usage is set.
                if let Some(usage) = chunk.usage {
                    return Some(StreamChunk {
                        delta: String::new(),
                        is_final: true,
                        finish_reason: None,
                        usage: Some(usage.into()),
                    });
                }

                let choice = chunk.choices.into_iter().next()?;
                Some(StreamChunk {
                    delta: choice.delta.content.unwrap_or_default(),
                    is_final: choice.finish_reason.is_some(),
                    finish_reason: choice.finish_reason,
                    usage: None,
                })
            }
            Err(e) => {
                debug!("Skipping unparseable {provider_name} stream chunk: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    fn name(&self) -> &'static str {
        self.config.provider_name
    }

    #[instrument(skip(self, request), fields(provider = self.config.provider_name, model = %request.model))]
    async fn stream_text(&self, request: &GenerationRequest) -> Result<GenerationStream, AppError> {
        debug!("Opening streaming completion request");

        let wire_request = CompletionRequest {
            model: request.model.clone(),
            messages: vec![WireMessage {
                role: "user",
                content: request.prompt.clone(),
            }],
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send request to {}: {e}", self.config.provider_name);
                AppError::upstream(self.config.provider_name, format!("Failed to connect: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error_response(status, &body));
        }

        let provider_name = self.config.provider_name;
        Ok(create_sse_stream(
            response.bytes_stream(),
            move |json_str| Self::parse_stream_data(provider_name, json_str).map(Ok),
            provider_name,
        ))
    }
}
