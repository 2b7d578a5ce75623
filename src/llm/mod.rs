// ABOUTME: Upstream text-generation abstraction shared by all model providers
// ABOUTME: Defines the streaming contract: relay text chunks, report usage, cancel on drop
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Upstream Model Providers
//!
//! Every upstream model is exposed through one capability: stream text for
//! a prompt, report token usage on completion, and support cancellation.
//! The orchestration layer is agnostic to which concrete vendor backs a
//! registry entry — adding a provider means implementing [`TextGenerator`]
//! and adding one [`registry::ProviderEntry`].
//!
//! Cancellation is by drop: releasing a [`GenerationStream`] tears down
//! the underlying HTTP connection, so a generation nobody is listening to
//! stops consuming upstream tokens.

pub mod anthropic;
pub mod openai_compatible;
pub mod registry;
pub mod sse_parser;

pub use anthropic::AnthropicGenerator;
pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleGenerator};
pub use registry::{ProviderEntry, ProviderRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::errors::AppError;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A single-prompt generation request
///
/// Each provider answers the prompt independently; no conversation history
/// is sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier (provider-specific)
    pub model: String,
    /// Plaintext prompt content
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a new generation request
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    /// Set the maximum tokens to generate
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage statistics reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

/// A chunk of a streaming response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Content delta for this chunk
    pub delta: String,
    /// Whether the generated content is complete
    pub is_final: bool,
    /// Finish reason if final
    pub finish_reason: Option<String>,
    /// Usage report, delivered on or after the final content chunk
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    /// A content-only chunk
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            is_final: false,
            finish_reason: None,
            usage: None,
        }
    }

    /// A terminal chunk with an optional finish reason
    #[must_use]
    pub fn finished(finish_reason: Option<String>) -> Self {
        Self {
            delta: String::new(),
            is_final: true,
            finish_reason,
            usage: None,
        }
    }
}

/// Stream type for generation responses
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AppError>> + Send>>;

// ============================================================================
// Generator Trait
// ============================================================================

/// Upstream text-generation contract
///
/// Implementations open a streaming call to their vendor API and relay
/// content deltas in production order. The usage report, when the vendor
/// supplies one, arrives on or after the final content chunk. Dropping
/// the returned stream cancels the in-flight upstream call.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name used in error messages and logs
    fn name(&self) -> &'static str;

    /// Open a streaming generation call
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream call cannot be opened; failures
    /// include the provider's HTTP status so callers can mirror it.
    async fn stream_text(&self, request: &GenerationRequest) -> Result<GenerationStream, AppError>;
}
