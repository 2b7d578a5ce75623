// ABOUTME: Stream orchestrator: relays one provider generation live and persists it once
// ABOUTME: The relay task outlives the HTTP response so completed generations are never lost
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Stream Orchestrator
//!
//! Executes one (prompt, provider) generation: opens the upstream call,
//! relays text chunks to the HTTP body in production order, measures
//! latency, computes usage and cost on completion, persists the terminal
//! response through its reservation, and appends the metadata trailer as
//! the last bytes of the stream.
//!
//! The generation loop runs in a spawned task feeding an mpsc channel;
//! the channel's receiver becomes the HTTP body. That split carries the
//! disconnect semantics:
//!
//! - A send failure means the client dropped the response. Mid-generation,
//!   the upstream stream is dropped (cancelling the vendor call), the
//!   reservation is released, and the partial content is discarded.
//! - If the upstream already finished, persistence still runs to
//!   completion — an answer that was fully generated is not wasted, and a
//!   database error at that point is logged rather than surfaced because
//!   nobody is listening.
//!
//! The wait for the provider's usage report after the final content chunk
//! is bounded; on timeout the response is persisted with zero token counts
//! and the stream closes without a trailer.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use crate::database::responses::{CompletedResponse, ResponseReservation};
use crate::database::ResponseRecord;
use crate::errors::{AppError, AppResult};
use crate::llm::registry::ProviderEntry;
use crate::llm::{GenerationRequest, GenerationStream, TokenUsage};
use crate::pricing::calculate_cost;
use crate::wire::{encode_metadata_trailer, UsageMetadata};

/// Bounded wait for the provider's usage report after content completes
const METADATA_WAIT: Duration = Duration::from_secs(2);

/// Relay channel depth; backpressure beyond this throttles the upstream read
const CHANNEL_CAPACITY: usize = 32;

/// Replay a cached `success` record as a complete response body
///
/// Emits the stored content followed by a trailer derived from the stored
/// usage columns. No upstream call is made.
#[must_use]
pub fn replay_cached(record: &ResponseRecord) -> Body {
    let mut body = record.content.clone().unwrap_or_default();
    if let Ok(trailer) = encode_metadata_trailer(&UsageMetadata::from(record)) {
        body.push_str(&trailer);
    }
    Body::from(body)
}

/// Open a generation for a held reservation and return the streaming body
///
/// # Errors
///
/// Returns the classified upstream error if the call cannot be opened; the
/// reservation is marked failed so the guard permits a clean retry.
pub async fn stream_generation(
    entry: ProviderEntry,
    reservation: ResponseReservation,
    prompt_id: String,
    prompt: String,
) -> AppResult<Body> {
    let request = GenerationRequest::new(entry.model, prompt);

    let upstream = match entry.generator.stream_text(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            // An error row (not a lingering reservation) lets the guard
            // clear the pair on the next attempt.
            if let Err(db_err) = reservation.fail(entry.display_name, &e.to_string()).await {
                error!("Failed to record upstream error: {db_err}");
            }
            return Err(e);
        }
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(CHANNEL_CAPACITY);
    tokio::spawn(relay(entry, reservation, prompt_id, upstream, tx));

    Ok(Body::from_stream(ReceiverStream::new(rx)))
}

/// Outcome of the content relay phase
enum RelayPhase {
    /// All content chunks were produced and relayed (or the client vanished
    /// after the final chunk was generated)
    Finished { client_gone: bool },
    /// The client dropped the response mid-generation
    Disconnected,
    /// The upstream failed after streaming began
    UpstreamFailed(AppError),
}

/// The generation relay loop, spawned per (prompt, provider) stream
async fn relay(
    entry: ProviderEntry,
    reservation: ResponseReservation,
    prompt_id: String,
    mut upstream: GenerationStream,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    let start = Instant::now();
    let mut full_content = String::new();
    let mut usage: Option<TokenUsage> = None;

    let phase = relay_content(&mut upstream, &tx, &mut full_content, &mut usage).await;

    match phase {
        RelayPhase::Disconnected => {
            // Cancel the vendor call and discard the partial content; the
            // released reservation lets a later request regenerate.
            drop(upstream);
            if let Err(e) = reservation.release().await {
                error!("Failed to release reservation: {e}");
            }
            debug!(
                provider = entry.id,
                %prompt_id, "Client disconnected mid-stream, generation torn down"
            );
        }
        RelayPhase::UpstreamFailed(e) => {
            warn!(provider = entry.id, %prompt_id, "Upstream failed mid-stream: {e}");
            if let Err(db_err) = reservation.fail(entry.display_name, &e.to_string()).await {
                error!("Failed to record upstream error: {db_err}");
            }
            // The body closes without a trailer; the client observes a
            // truncated stream and the error row permits retry.
        }
        RelayPhase::Finished { client_gone } => {
            if usage.is_none() {
                usage = await_usage_report(&mut upstream).await;
            }
            drop(upstream);

            let latency_ms = start.elapsed().as_millis() as u64;
            let metadata = build_metadata(entry.pricing_key, usage);

            persist(
                &reservation,
                &entry,
                &prompt_id,
                &full_content,
                latency_ms,
                metadata,
                client_gone,
            )
            .await;

            // Trailer emission is best-effort and only meaningful when the
            // provider actually reported usage within the bounded wait.
            if !client_gone && usage.is_some() {
                if let Ok(trailer) = encode_metadata_trailer(&metadata) {
                    let _ = tx.send(Ok(Bytes::from(trailer.into_bytes()))).await;
                }
            }
        }
    }
}

/// Relay content chunks until the generation finishes or breaks
async fn relay_content(
    upstream: &mut GenerationStream,
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    full_content: &mut String,
    usage: &mut Option<TokenUsage>,
) -> RelayPhase {
    while let Some(item) = upstream.next().await {
        match item {
            Ok(chunk) => {
                if let Some(report) = chunk.usage {
                    *usage = Some(report);
                }

                if !chunk.delta.is_empty() {
                    full_content.push_str(&chunk.delta);
                    if tx.send(Ok(Bytes::from(chunk.delta.into_bytes()))).await.is_err() {
                        // The final chunk of an already-complete generation
                        // is not wasted on a vanished client; anything
                        // earlier is a mid-generation disconnect.
                        if chunk.is_final {
                            return RelayPhase::Finished { client_gone: true };
                        }
                        return RelayPhase::Disconnected;
                    }
                }

                if chunk.is_final {
                    return RelayPhase::Finished { client_gone: false };
                }
            }
            Err(e) => return RelayPhase::UpstreamFailed(e),
        }
    }

    // Stream ended without a final marker: content is complete
    RelayPhase::Finished { client_gone: false }
}

/// Drain the upstream for a late usage report, bounded by [`METADATA_WAIT`]
async fn await_usage_report(upstream: &mut GenerationStream) -> Option<TokenUsage> {
    timeout(METADATA_WAIT, async {
        while let Some(item) = upstream.next().await {
            if let Ok(chunk) = item {
                if let Some(report) = chunk.usage {
                    return Some(report);
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Token counts default to zero when the provider reported no usage
fn build_metadata(pricing_key: &str, usage: Option<TokenUsage>) -> UsageMetadata {
    let prompt_tokens = usage.map_or(0, |u| u.prompt_tokens);
    let completion_tokens = usage.map_or(0, |u| u.completion_tokens);
    UsageMetadata {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        cost: calculate_cost(pricing_key, prompt_tokens, completion_tokens),
    }
}

/// Persist the terminal response, retrying once while the client is connected
async fn persist(
    reservation: &ResponseReservation,
    entry: &ProviderEntry,
    prompt_id: &str,
    content: &str,
    latency_ms: u64,
    metadata: UsageMetadata,
    client_gone: bool,
) {
    let completed = CompletedResponse {
        model: entry.display_name,
        content,
        latency_ms,
        usage: metadata,
    };

    match reservation.complete(completed.clone()).await {
        Ok(()) => {}
        Err(e) if client_gone => {
            // The user already has their answer; a lost write after they
            // disconnected is acceptable degradation.
            debug!(
                provider = entry.id,
                %prompt_id, "Dropping persistence error after client disconnect: {e}"
            );
        }
        Err(e) => {
            warn!(provider = entry.id, %prompt_id, "Retrying response persistence: {e}");
            if let Err(retry_err) = reservation.complete(completed).await {
                error!(
                    provider = entry.id,
                    %prompt_id, "Failed to persist response: {retry_err}"
                );
            }
        }
    }
}
