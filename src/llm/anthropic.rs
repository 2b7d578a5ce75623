// ABOUTME: Streaming text generator for the native Anthropic Messages API
// ABOUTME: Reconstructs the usage report from message_start and message_delta events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Anthropic Generator
//!
//! Implementation of [`TextGenerator`] for the Anthropic Messages API,
//! which frames streaming differently from the OpenAI shape: input tokens
//! arrive in the `message_start` event, text in `content_block_delta`
//! events, and output tokens plus the stop reason in `message_delta`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use tracing::{debug, error, instrument};

use super::sse_parser::create_sse_stream;
use super::{GenerationRequest, GenerationStream, StreamChunk, TextGenerator, TokenUsage};
use crate::errors::AppError;

/// API version header required by the Messages API
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Maximum tokens sent when the request does not specify one
/// (`max_tokens` is mandatory in the Messages API)
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ============================================================================
// API Request/Response Types
// ============================================================================

/// Messages API request
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    stream: bool,
}

/// Message structure for the Messages API
#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// A streaming event, tagged by its `type` field
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    /// Opens the message; carries input token usage
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStart },
    /// A text delta
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: ContentDelta },
    /// Closes the content; carries output token usage and stop reason
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaBody,
        usage: OutputUsage,
    },
    /// Upstream error surfaced mid-stream
    #[serde(rename = "error")]
    Error { error: ApiErrorDetail },
    /// Ping, content_block_start/stop, message_stop
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    usage: InputUsage,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ContentDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

/// API error body (also used for non-2xx responses)
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// Generator Implementation
// ============================================================================

/// Text generator for the native Anthropic Messages API
pub struct AnthropicGenerator {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicGenerator {
    /// Create a new generator
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn parse_error_response(status: reqwest::StatusCode, body: &str) -> AppError {
        let message = serde_json::from_str::<ApiErrorResponse>(body).map_or_else(
            |_| body.chars().take(200).collect::<String>(),
            |parsed| parsed.error.message,
        );

        if status.as_u16() == 429 {
            return AppError::upstream_rate_limited().with_upstream_status(429);
        }

        AppError::upstream("anthropic", message).with_upstream_status(status.as_u16())
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    #[instrument(skip(self, request), fields(provider = "anthropic", model = %request.model))]
    async fn stream_text(&self, request: &GenerationRequest) -> Result<GenerationStream, AppError> {
        debug!("Opening streaming messages request");

        let wire_request = MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: vec![WireMessage {
                role: "user",
                content: request.prompt.clone(),
            }],
            stream: true,
        };

        let response = self
            .client
            .post(self.api_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send request to Anthropic: {e}");
                AppError::upstream("anthropic", format!("Failed to connect: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error_response(status, &body));
        }

        // Input tokens arrive in message_start, long before the terminal
        // message_delta; the cell carries them across events.
        let input_tokens = Cell::new(0_u32);

        Ok(create_sse_stream(
            response.bytes_stream(),
            move |json_str| match serde_json::from_str::<StreamEvent>(json_str) {
                Ok(StreamEvent::MessageStart { message }) => {
                    input_tokens.set(message.usage.input_tokens);
                    None
                }
                Ok(StreamEvent::ContentBlockDelta { delta }) => {
                    delta.text.map(|text| Ok(StreamChunk::delta(text)))
                }
                Ok(StreamEvent::MessageDelta { delta, usage }) => {
                    let prompt_tokens = input_tokens.get();
                    Some(Ok(StreamChunk {
                        delta: String::new(),
                        is_final: true,
                        finish_reason: delta.stop_reason,
                        usage: Some(TokenUsage {
                            prompt_tokens,
                            completion_tokens: usage.output_tokens,
                            total_tokens: prompt_tokens + usage.output_tokens,
                        }),
                    }))
                }
                Ok(StreamEvent::Error { error }) => {
                    Some(Err(AppError::upstream("anthropic", error.message)))
                }
                Ok(StreamEvent::Other) => None,
                Err(e) => {
                    debug!("Skipping unparseable Anthropic stream event: {e}");
                    None
                }
            },
            "anthropic",
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let start: StreamEvent = serde_json::from_str(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":14}}}"#,
        )
        .unwrap();
        assert!(matches!(
            start,
            StreamEvent::MessageStart { ref message } if message.usage.input_tokens == 14
        ));

        let delta: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap();
        assert!(matches!(
            delta,
            StreamEvent::ContentBlockDelta { ref delta } if delta.text.as_deref() == Some("Hi")
        ));

        let done: StreamEvent = serde_json::from_str(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":40}}"#,
        )
        .unwrap();
        assert!(matches!(
            done,
            StreamEvent::MessageDelta { ref usage, .. } if usage.output_tokens == 40
        ));

        let ping: StreamEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, StreamEvent::Other));
    }
}
