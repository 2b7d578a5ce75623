// ABOUTME: Scripted text generators standing in for upstream model providers
// ABOUTME: Deterministic chunk sequences with pacing, usage reports, and failure modes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use triptych::errors::{AppError, AppResult};
use triptych::llm::{
    GenerationRequest, GenerationStream, ProviderEntry, ProviderRegistry, StreamChunk,
    TextGenerator, TokenUsage,
};

/// One step of a scripted generation
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a content delta
    Delta(&'static str),
    /// Sleep before the next step (simulates generation pacing)
    Pause(Duration),
    /// Emit the final content marker, optionally with a usage report
    Finish { usage: Option<TokenUsage> },
    /// Fail mid-stream
    Error(&'static str),
}

/// A deterministic stand-in for an upstream provider
pub struct ScriptedGenerator {
    name: &'static str,
    steps: Vec<ScriptStep>,
    /// Fail at stream open with this (status, message) instead of streaming
    open_failure: Option<(u16, &'static str)>,
    /// Number of times `stream_text` was invoked
    calls: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    /// A generator that streams the given chunks then finishes with usage
    pub fn succeeding(
        name: &'static str,
        chunks: &[&'static str],
        usage: TokenUsage,
    ) -> Self {
        let mut steps: Vec<ScriptStep> = chunks.iter().map(|c| ScriptStep::Delta(*c)).collect();
        steps.push(ScriptStep::Finish { usage: Some(usage) });
        Self::from_steps(name, steps)
    }

    /// A generator built from explicit steps
    pub fn from_steps(name: &'static str, steps: Vec<ScriptStep>) -> Self {
        Self {
            name,
            steps,
            open_failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A generator that fails at stream open with the given status
    pub fn failing_open(name: &'static str, status: u16, message: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
            open_failure: Some((status, message)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle onto the upstream invocation counter
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn stream_text(&self, _request: &GenerationRequest) -> AppResult<GenerationStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some((status, message)) = self.open_failure {
            let error = if status == 429 {
                AppError::upstream_rate_limited()
            } else {
                AppError::upstream(self.name, message).with_upstream_status(status)
            };
            return Err(error);
        }

        let steps = self.steps.clone();
        let name = self.name;
        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Delta(text) => yield Ok(StreamChunk::delta(text)),
                    ScriptStep::Pause(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Finish { usage } => {
                        yield Ok(StreamChunk {
                            delta: String::new(),
                            is_final: true,
                            finish_reason: Some("stop".to_owned()),
                            usage,
                        });
                    }
                    ScriptStep::Error(message) => {
                        yield Err(AppError::upstream(name, message));
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Standard usage figures for tests
pub fn test_usage() -> TokenUsage {
    TokenUsage {
        prompt_tokens: 10,
        completion_tokens: 20,
        total_tokens: 30,
    }
}

/// Wrap a generator into a registry entry under a known provider id
pub fn entry(id: &'static str, generator: ScriptedGenerator) -> ProviderEntry {
    let (display_name, model, pricing_key) = match id {
        "openai" => ("GPT-4o", "gpt-4o", "gpt-4o"),
        "anthropic" => (
            "Claude 3.5 Sonnet",
            "claude-3-5-sonnet-20241022",
            "claude-3-sonnet-20240229",
        ),
        "xai" => ("Grok 3", "grok-3", "grok-3"),
        _ => ("Scripted", "scripted-model", "scripted"),
    };

    ProviderEntry {
        id,
        display_name,
        model,
        pricing_key,
        generator: Arc::new(generator),
    }
}

/// A three-provider registry where every provider succeeds
pub fn all_success_registry() -> ProviderRegistry {
    ProviderRegistry::new(vec![
        entry(
            "openai",
            ScriptedGenerator::succeeding("openai", &["The answer ", "is 4."], test_usage()),
        ),
        entry(
            "anthropic",
            ScriptedGenerator::succeeding("anthropic", &["2+2 ", "equals 4."], test_usage()),
        ),
        entry(
            "xai",
            ScriptedGenerator::succeeding("xai", &["It's ", "4."], test_usage()),
        ),
    ])
}
