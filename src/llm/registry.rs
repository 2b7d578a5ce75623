// ABOUTME: Static catalog mapping provider ids to model, display name, pricing key, and backend
// ABOUTME: Orchestration resolves entries here and never special-cases a provider by name
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Provider Registry
//!
//! The fixed catalog of supported providers. Each entry binds a provider
//! id to its display name, upstream model, pricing key, and the generator
//! backend that speaks its wire format. Adding a provider means adding one
//! entry — the orchestration layer resolves entries by id and never
//! branches on a provider name.

use std::sync::Arc;

use super::{
    AnthropicGenerator, OpenAiCompatibleConfig, OpenAiCompatibleGenerator, TextGenerator,
};
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};

/// One registered provider
#[derive(Clone)]
pub struct ProviderEntry {
    /// Stable provider identifier used in URLs and response records
    pub id: &'static str,
    /// Human-readable model name shown to users
    pub display_name: &'static str,
    /// Upstream model identifier sent on the wire
    pub model: &'static str,
    /// Key into the pricing table
    pub pricing_key: &'static str,
    /// Backend that streams text for this provider
    pub generator: Arc<dyn TextGenerator>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("model", &self.model)
            .field("pricing_key", &self.pricing_key)
            .field("generator", &"<dyn TextGenerator>")
            .finish()
    }
}

/// Catalog of supported providers
#[derive(Clone)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    /// Create a registry from explicit entries (tests inject scripted backends here)
    #[must_use]
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        Self { entries }
    }

    /// Build the production registry from configured credentials
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(vec![
            ProviderEntry {
                id: "openai",
                display_name: "GPT-4o",
                model: "gpt-4o",
                pricing_key: "gpt-4o",
                generator: Arc::new(OpenAiCompatibleGenerator::new(OpenAiCompatibleConfig {
                    base_url: config.openai.base_url.clone(),
                    api_key: config.openai.api_key.clone(),
                    provider_name: "openai",
                })),
            },
            ProviderEntry {
                id: "anthropic",
                display_name: "Claude 3.5 Sonnet",
                model: "claude-3-5-sonnet-20241022",
                pricing_key: "claude-3-sonnet-20240229",
                generator: Arc::new(AnthropicGenerator::new(
                    config.anthropic.base_url.clone(),
                    config.anthropic.api_key.clone(),
                )),
            },
            ProviderEntry {
                id: "xai",
                display_name: "Grok 3",
                model: "grok-3",
                pricing_key: "grok-3",
                generator: Arc::new(OpenAiCompatibleGenerator::new(OpenAiCompatibleConfig {
                    base_url: config.xai.base_url.clone(),
                    api_key: config.xai.api_key.clone(),
                    provider_name: "xai",
                })),
            },
        ])
    }

    /// Resolve a provider id to its entry
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorCode::UnknownProvider`] for ids outside
    /// the registered set.
    pub fn resolve(&self, provider_id: &str) -> AppResult<&ProviderEntry> {
        self.entries
            .iter()
            .find(|entry| entry.id == provider_id)
            .ok_or_else(|| AppError::unknown_provider(provider_id))
    }

    /// All registered provider ids, in registration order
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over registered entries
    pub fn iter(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.iter()
    }
}
