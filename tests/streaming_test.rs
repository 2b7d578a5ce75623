// ABOUTME: Integration tests for the stream orchestrator
// ABOUTME: Chunk ordering, trailer emission, usage defaults, failures, and disconnects
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use std::time::Duration;

use common::create_test_database;
use futures_util::StreamExt;
use helpers::scripted::{entry, test_usage, ScriptStep, ScriptedGenerator};
use triptych::database::{CacheDecision, Database};
use triptych::services::stream_generation;
use triptych::wire::strip_trailer;

async fn seed_prompt(db: &Database, prompt_id: &str) {
    let chat = db.chats().create_chat("user_a", None).await.unwrap();
    db.chats()
        .create_prompt(&chat.id, "user_a", "What is 2+2?", Some(prompt_id))
        .await
        .unwrap();
}

async fn reserve(db: &Database, prompt_id: &str, provider: &str) -> triptych::database::ResponseReservation {
    match db.responses().check_or_reserve(prompt_id, provider).await.unwrap() {
        CacheDecision::Proceed(reservation) => reservation,
        _ => panic!("expected Proceed"),
    }
}

/// Read the whole body, returning the chunks in arrival order
async fn collect_chunks(body: axum::body::Body) -> Vec<String> {
    let mut stream = body.into_data_stream();
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(String::from_utf8(chunk.unwrap().to_vec()).unwrap());
    }
    chunks
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_chunks_relayed_in_order_with_trailer_last() {
    let db = create_test_database().await;
    seed_prompt(&db, "p1").await;
    let reservation = reserve(&db, "p1", "openai").await;

    let generator =
        ScriptedGenerator::succeeding("openai", &["The ", "answer ", "is ", "4."], test_usage());
    let body = stream_generation(
        entry("openai", generator),
        reservation,
        "p1".to_owned(),
        "What is 2+2?".to_owned(),
    )
    .await
    .unwrap();

    let chunks = collect_chunks(body).await;

    // Content chunks arrive in production order, before the trailer
    assert_eq!(chunks[0], "The ");
    assert_eq!(chunks[1], "answer ");
    assert_eq!(chunks[2], "is ");
    assert_eq!(chunks[3], "4.");

    let full: String = chunks.concat();
    let (text, usage) = strip_trailer(&full);
    assert_eq!(text, "The answer is 4.");

    let usage = usage.expect("trailer must carry usage");
    assert_eq!(usage.prompt_tokens, 10);
    assert_eq!(usage.completion_tokens, 20);
    assert_eq!(usage.total_tokens, 30);
    // gpt-4o pricing: 10/1e6*2.5 + 20/1e6*10.0
    assert!((usage.cost - 0.000_225).abs() < 1e-12);

    // The terminal record matches what was streamed
    let record = db.responses().get_for_pair("p1", "openai").await.unwrap().unwrap();
    assert_eq!(record.status, "success");
    assert_eq!(record.content.as_deref(), Some("The answer is 4."));
    assert_eq!(record.model.as_deref(), Some("GPT-4o"));
    assert_eq!(record.total_tokens, 30);
    assert!(record.latency_ms.is_some());
}

#[tokio::test]
async fn test_missing_usage_persists_zeros_and_omits_trailer() {
    let db = create_test_database().await;
    seed_prompt(&db, "p1").await;
    let reservation = reserve(&db, "p1", "openai").await;

    let generator = ScriptedGenerator::from_steps(
        "openai",
        vec![
            ScriptStep::Delta("no usage here"),
            ScriptStep::Finish { usage: None },
        ],
    );
    let body = stream_generation(
        entry("openai", generator),
        reservation,
        "p1".to_owned(),
        "prompt".to_owned(),
    )
    .await
    .unwrap();

    let full: String = collect_chunks(body).await.concat();
    let (text, usage) = strip_trailer(&full);
    assert_eq!(text, "no usage here");
    assert!(usage.is_none(), "stream must close without a trailer");

    let record = db.responses().get_for_pair("p1", "openai").await.unwrap().unwrap();
    assert_eq!(record.status, "success");
    assert_eq!(record.prompt_tokens, 0);
    assert_eq!(record.completion_tokens, 0);
    assert!((record.cost - 0.0).abs() < f64::EPSILON);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_open_failure_records_error_and_mirrors_status() {
    let db = create_test_database().await;
    seed_prompt(&db, "p1").await;
    let reservation = reserve(&db, "p1", "openai").await;

    let generator = ScriptedGenerator::failing_open("openai", 503, "overloaded");
    let err = stream_generation(
        entry("openai", generator),
        reservation,
        "p1".to_owned(),
        "prompt".to_owned(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.http_status(), 503);

    let record = db.responses().get_for_pair("p1", "openai").await.unwrap().unwrap();
    assert_eq!(record.status, "error");
}

#[tokio::test]
async fn test_rate_limit_surfaces_429() {
    let db = create_test_database().await;
    seed_prompt(&db, "p1").await;
    let reservation = reserve(&db, "p1", "openai").await;

    let generator = ScriptedGenerator::failing_open("openai", 429, "slow down");
    let err = stream_generation(
        entry("openai", generator),
        reservation,
        "p1".to_owned(),
        "prompt".to_owned(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.http_status(), 429);
}

#[tokio::test]
async fn test_midstream_failure_truncates_and_records_error() {
    let db = create_test_database().await;
    seed_prompt(&db, "p1").await;
    let reservation = reserve(&db, "p1", "openai").await;

    let generator = ScriptedGenerator::from_steps(
        "openai",
        vec![
            ScriptStep::Delta("partial "),
            ScriptStep::Error("connection reset"),
        ],
    );
    let body = stream_generation(
        entry("openai", generator),
        reservation,
        "p1".to_owned(),
        "prompt".to_owned(),
    )
    .await
    .unwrap();

    let full: String = collect_chunks(body).await.concat();
    let (text, usage) = strip_trailer(&full);
    assert_eq!(text, "partial ");
    assert!(usage.is_none());

    let record = db.responses().get_for_pair("p1", "openai").await.unwrap().unwrap();
    assert_eq!(record.status, "error");
    assert!(record
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("connection reset")));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_disconnect_midstream_discards_partial_content() {
    let db = create_test_database().await;
    seed_prompt(&db, "p1").await;
    let reservation = reserve(&db, "p1", "openai").await;

    // A long, slow generation: the channel cannot buffer it all
    let mut steps = Vec::new();
    for _ in 0..200 {
        steps.push(ScriptStep::Delta("chunk "));
        steps.push(ScriptStep::Pause(Duration::from_millis(2)));
    }
    steps.push(ScriptStep::Finish { usage: Some(test_usage()) });

    let generator = ScriptedGenerator::from_steps("openai", steps);
    let body = stream_generation(
        entry("openai", generator),
        reservation,
        "p1".to_owned(),
        "prompt".to_owned(),
    )
    .await
    .unwrap();

    // Read a little, then abandon the response mid-generation
    let mut stream = body.into_data_stream();
    let first = stream.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    drop(stream);

    // Give the relay time to notice and tear down
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Partial-yet-uncommitted content is discarded, not persisted
    assert!(db.responses().get_for_pair("p1", "openai").await.unwrap().is_none());
}

#[tokio::test]
async fn test_completed_generation_survives_disconnect() {
    let db = create_test_database().await;
    seed_prompt(&db, "p1").await;
    let reservation = reserve(&db, "p1", "openai").await;

    let generator = ScriptedGenerator::succeeding("openai", &["4"], test_usage());
    let body = stream_generation(
        entry("openai", generator),
        reservation,
        "p1".to_owned(),
        "prompt".to_owned(),
    )
    .await
    .unwrap();

    // The client vanishes, but the upstream call already completed
    drop(body);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let record = db.responses().get_for_pair("p1", "openai").await.unwrap().unwrap();
    assert_eq!(record.status, "success");
    assert_eq!(record.content.as_deref(), Some("4"));
}
