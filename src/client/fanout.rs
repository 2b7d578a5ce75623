// ABOUTME: Fan-out coordinator: concurrent per-provider streams with actor-owned completion state
// ABOUTME: Declares a prompt settled only after reconciling with server-persisted responses
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Fan-Out Coordinator
//!
//! For one prompt, starts exactly one submit stream per registered
//! provider, concurrently, and exposes a single "still being answered"
//! boolean. Completion tracking (`prompt_id -> set of providers done`) is
//! owned by a single actor task and mutated only through its mailbox, so
//! concurrent stream completions can never race on the shared map.
//!
//! A provider-level error counts as done for aggregation: one failing
//! provider neither blocks the others nor prevents settlement. When the
//! done-set reaches the full provider count the actor reconciles against
//! durable storage (the chat detail read) before declaring the prompt
//! settled; if the persisted responses are not yet visible it retries once
//! after a short fixed delay, then accepts the in-memory state as
//! authoritative. Settling from stream state alone risks a "no response
//! available" flash while the last write is still landing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::api::ApiClient;
use crate::wire::{TrailerScanner, UsageMetadata};

/// Fixed delay before the single reconciliation retry
const RECONCILE_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Mailbox depth for coordinator commands
const COMMAND_CAPACITY: usize = 64;

// ============================================================================
// Events
// ============================================================================

/// Terminal outcome of one provider's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    /// The stream completed; content was delivered
    Success,
    /// The stream failed with a user-facing classification
    Error {
        /// Short human-readable title (e.g. "Rate Limited")
        title: String,
        /// One-sentence description with a suggested action
        description: String,
    },
}

/// Events emitted to the UI while a prompt is being answered
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Display text from one provider, in production order
    Chunk {
        /// Prompt being answered
        prompt_id: String,
        /// Provider that produced the text
        provider: String,
        /// Text safe to display (trailer already stripped)
        text: String,
    },
    /// Usage/cost figures parsed from a provider's trailer
    Metadata {
        /// Prompt being answered
        prompt_id: String,
        /// Provider the figures belong to
        provider: String,
        /// Parsed usage figures
        usage: UsageMetadata,
    },
    /// One provider reached a terminal outcome
    ProviderDone {
        /// Prompt being answered
        prompt_id: String,
        /// Provider that finished
        provider: String,
        /// Success or classified error
        outcome: ProviderOutcome,
    },
    /// Every provider finished and storage was reconciled
    Settled {
        /// Prompt that settled
        prompt_id: String,
        /// Whether persisted responses were confirmed visible
        confirmed: bool,
    },
}

// ============================================================================
// Coordinator
// ============================================================================

/// Commands into the coordinator actor
enum Command {
    Begin {
        chat_id: String,
        prompt_id: String,
    },
    Done {
        prompt_id: String,
        provider: String,
    },
}

/// Client-side driver for concurrent per-provider streaming
pub struct FanOutCoordinator {
    api: Arc<ApiClient>,
    providers: Vec<String>,
    commands: mpsc::Sender<Command>,
    events: mpsc::Sender<SessionEvent>,
    streaming: watch::Receiver<usize>,
}

impl FanOutCoordinator {
    /// Create a coordinator and spawn its state-owning actor
    ///
    /// `events` receives the session event stream; `providers` is the full
    /// set a prompt must hear back from before it can settle.
    #[must_use]
    pub fn new(
        api: Arc<ApiClient>,
        providers: Vec<String>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (streaming_tx, streaming) = watch::channel(0_usize);

        tokio::spawn(actor(
            command_rx,
            streaming_tx,
            Arc::clone(&api),
            providers.clone(),
            events.clone(),
        ));

        Self {
            api,
            providers,
            commands,
            events,
            streaming,
        }
    }

    /// Whether any prompt is still being answered
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        *self.streaming.borrow() > 0
    }

    /// Watch the number of in-flight prompts
    #[must_use]
    pub fn streaming_watch(&self) -> watch::Receiver<usize> {
        self.streaming.clone()
    }

    /// Launch one concurrent stream per provider for a prompt
    ///
    /// Returns immediately; progress arrives on the event channel.
    pub async fn begin_streaming(&self, chat_id: &str, prompt_id: &str, prompt: &str) {
        let _ = self
            .commands
            .send(Command::Begin {
                chat_id: chat_id.to_owned(),
                prompt_id: prompt_id.to_owned(),
            })
            .await;

        for provider in &self.providers {
            tokio::spawn(relay_provider(
                Arc::clone(&self.api),
                chat_id.to_owned(),
                prompt_id.to_owned(),
                provider.clone(),
                prompt.to_owned(),
                self.events.clone(),
                self.commands.clone(),
            ));
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Completion tracking for one in-flight prompt
struct PromptTracking {
    chat_id: String,
    done: HashSet<String>,
}

/// The single owner of all completion state
async fn actor(
    mut commands: mpsc::Receiver<Command>,
    streaming: watch::Sender<usize>,
    api: Arc<ApiClient>,
    providers: Vec<String>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut in_flight: HashMap<String, PromptTracking> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Begin { chat_id, prompt_id } => {
                in_flight.insert(
                    prompt_id,
                    PromptTracking {
                        chat_id,
                        done: HashSet::new(),
                    },
                );
                let _ = streaming.send(in_flight.len());
            }
            Command::Done {
                prompt_id,
                provider,
            } => {
                let Some(tracking) = in_flight.get_mut(&prompt_id) else {
                    continue;
                };
                tracking.done.insert(provider);

                if tracking.done.len() < providers.len() {
                    continue;
                }

                let chat_id = tracking.chat_id.clone();
                let confirmed = reconcile(&api, &chat_id, &prompt_id).await;
                in_flight.remove(&prompt_id);
                let _ = streaming.send(in_flight.len());
                let _ = events
                    .send(SessionEvent::Settled {
                        prompt_id,
                        confirmed,
                    })
                    .await;
            }
        }
    }
}

/// Confirm persisted responses are visible before settling
///
/// Retries the fetch once after a short fixed delay; a second miss settles
/// on the in-memory state (confirmed = false).
async fn reconcile(api: &ApiClient, chat_id: &str, prompt_id: &str) -> bool {
    if prompt_has_responses(api, chat_id, prompt_id).await {
        return true;
    }

    debug!(prompt_id, "Persisted responses not yet visible, retrying reconciliation");
    tokio::time::sleep(RECONCILE_RETRY_DELAY).await;

    if prompt_has_responses(api, chat_id, prompt_id).await {
        return true;
    }

    warn!(prompt_id, "Settling on in-memory state, storage never confirmed");
    false
}

async fn prompt_has_responses(api: &ApiClient, chat_id: &str, prompt_id: &str) -> bool {
    match api.get_chat(chat_id).await {
        Ok(chat) => chat
            .prompts
            .iter()
            .any(|p| p.id == prompt_id && !p.responses.is_empty()),
        Err(e) => {
            warn!("Reconciliation fetch failed: {e}");
            false
        }
    }
}

// ============================================================================
// Per-Provider Relay
// ============================================================================

/// Consume one provider's stream, emitting events and reporting done once
async fn relay_provider(
    api: Arc<ApiClient>,
    chat_id: String,
    prompt_id: String,
    provider: String,
    prompt: String,
    events: mpsc::Sender<SessionEvent>,
    commands: mpsc::Sender<Command>,
) {
    let outcome = stream_provider(&api, &chat_id, &prompt_id, &provider, &prompt, &events).await;

    let _ = events
        .send(SessionEvent::ProviderDone {
            prompt_id: prompt_id.clone(),
            provider: provider.clone(),
            outcome,
        })
        .await;

    // Done is reported exactly once per provider, success or error, so a
    // failing provider can never hang the aggregate state.
    let _ = commands
        .send(Command::Done {
            prompt_id,
            provider,
        })
        .await;
}

async fn stream_provider(
    api: &ApiClient,
    chat_id: &str,
    prompt_id: &str,
    provider: &str,
    prompt: &str,
    events: &mpsc::Sender<SessionEvent>,
) -> ProviderOutcome {
    let mut stream = match api.submit_stream(chat_id, provider, prompt, prompt_id).await {
        Ok(stream) => stream,
        Err(e) => {
            let (title, description) = classify_error(e.http_status(), &e.message);
            return ProviderOutcome::Error { title, description };
        }
    };

    let mut decoder = Utf8Decoder::default();
    let mut scanner = TrailerScanner::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(bytes) => {
                let text = scanner.feed(&decoder.feed(&bytes));
                if !text.is_empty() {
                    let _ = events
                        .send(SessionEvent::Chunk {
                            prompt_id: prompt_id.to_owned(),
                            provider: provider.to_owned(),
                            text,
                        })
                        .await;
                }
            }
            Err(e) => {
                let (title, description) = classify_error(0, &e.to_string());
                return ProviderOutcome::Error { title, description };
            }
        }
    }

    let (rest, usage) = scanner.finish();
    if !rest.is_empty() {
        let _ = events
            .send(SessionEvent::Chunk {
                prompt_id: prompt_id.to_owned(),
                provider: provider.to_owned(),
                text: rest,
            })
            .await;
    }
    if let Some(usage) = usage {
        let _ = events
            .send(SessionEvent::Metadata {
                prompt_id: prompt_id.to_owned(),
                provider: provider.to_owned(),
                usage,
            })
            .await;
    }

    ProviderOutcome::Success
}

/// Map an error status/message to a user-facing title and description
fn classify_error(status: u16, message: &str) -> (String, String) {
    let (title, description) = match status {
        429 => (
            "Rate Limited",
            "Too many requests. Please wait a moment and try again.",
        ),
        401 => ("Authentication Error", "API key is invalid or missing."),
        403 => (
            "Access Denied",
            "You don't have permission to access this model.",
        ),
        500 | 502 | 503 => (
            "Service Unavailable",
            "The AI service is temporarily unavailable. Please try again.",
        ),
        _ if message.to_lowercase().contains("timeout") => (
            "Request Timeout",
            "The request took too long. Please try again.",
        ),
        _ => {
            let description = if message.is_empty() {
                "An unexpected error occurred.".to_owned()
            } else {
                message.to_owned()
            };
            return ("Error".to_owned(), description);
        }
    };
    (title.to_owned(), description.to_owned())
}

/// Incremental UTF-8 decoder tolerating multi-byte chars split across chunks
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn feed(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let out = text.to_owned();
                self.pending.clear();
                out
            }
            Err(e) if e.error_len().is_some() => {
                // Genuinely invalid bytes: decode lossily and move on
                let out = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                out
            }
            Err(e) => {
                // Incomplete trailing sequence: hold it for the next chunk
                let valid = e.valid_up_to();
                let out = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                out
            }
        }
    }
}
