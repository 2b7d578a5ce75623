// ABOUTME: Integration tests for the streaming submit endpoint
// ABOUTME: Validation, cache idempotence, duplicate races, and upstream error mapping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::StatusCode;
use common::{bearer_for, create_test_resources};
use helpers::axum_test::AxumTestRequest;
use helpers::scripted::{entry, test_usage, ScriptStep, ScriptedGenerator};
use serde_json::json;
use triptych::llm::ProviderRegistry;
use triptych::wire::strip_trailer;

/// Build a router whose openai entry uses the given generator, plus a
/// helper that seeds a chat and prompt through the API
async fn setup_with_generator(
    generator: ScriptedGenerator,
) -> (axum::Router, String) {
    let registry = ProviderRegistry::new(vec![entry("openai", generator)]);
    let resources = create_test_resources(registry).await;
    let auth = bearer_for(&resources, "user_a");
    (triptych::routes::router(resources), auth)
}

async fn seed_prompt(router: &axum::Router, auth: &str) {
    let response = AxumTestRequest::post("/api/chats/c1/prompts")
        .header("authorization", auth)
        .json(&json!({"content": "What is 2+2?", "promptId": "p1"}))
        .send(router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
}

fn submit_request(auth: &str) -> AxumTestRequest {
    AxumTestRequest::post("/api/chats/c1/submit?provider=openai")
        .header("authorization", auth)
        .json(&json!({"prompt": "What is 2+2?", "promptId": "p1"}))
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_unknown_provider_rejected() {
    let (router, auth) =
        setup_with_generator(ScriptedGenerator::succeeding("openai", &["4"], test_usage())).await;
    seed_prompt(&router, &auth).await;

    let response = AxumTestRequest::post("/api/chats/c1/submit?provider=mistral")
        .header("authorization", &auth)
        .json(&json!({"prompt": "q", "promptId": "p1"}))
        .send(router.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let missing = AxumTestRequest::post("/api/chats/c1/submit")
        .header("authorization", &auth)
        .json(&json!({"prompt": "q", "promptId": "p1"}))
        .send(router)
        .await;
    assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_fields_rejected() {
    let (router, auth) =
        setup_with_generator(ScriptedGenerator::succeeding("openai", &["4"], test_usage())).await;
    seed_prompt(&router, &auth).await;

    for body in [json!({"promptId": "p1"}), json!({"prompt": "q"}), json!({})] {
        let response = AxumTestRequest::post("/api/chats/c1/submit?provider=openai")
            .header("authorization", &auth)
            .json(&body)
            .send(router.clone())
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST, "body {body}");
    }
}

#[tokio::test]
async fn test_unknown_chat_and_prompt_are_not_found() {
    let (router, auth) =
        setup_with_generator(ScriptedGenerator::succeeding("openai", &["4"], test_usage())).await;
    seed_prompt(&router, &auth).await;

    let wrong_chat = AxumTestRequest::post("/api/chats/other/submit?provider=openai")
        .header("authorization", &auth)
        .json(&json!({"prompt": "q", "promptId": "p1"}))
        .send(router.clone())
        .await;
    assert_eq!(wrong_chat.status_code(), StatusCode::NOT_FOUND);

    let wrong_prompt = AxumTestRequest::post("/api/chats/c1/submit?provider=openai")
        .header("authorization", &auth)
        .json(&json!({"prompt": "q", "promptId": "p-unknown"}))
        .send(router)
        .await;
    assert_eq!(wrong_prompt.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_foreign_chat_submit_is_not_found() {
    let generator = ScriptedGenerator::succeeding("openai", &["4"], test_usage());
    let registry = ProviderRegistry::new(vec![entry("openai", generator)]);
    let resources = create_test_resources(registry).await;
    let owner = bearer_for(&resources, "user_a");
    let intruder = bearer_for(&resources, "user_b");
    let router = triptych::routes::router(resources);

    seed_prompt(&router, &owner).await;

    let response = submit_request(&intruder).send(router).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unauthenticated_submit_rejected() {
    let (router, auth) =
        setup_with_generator(ScriptedGenerator::succeeding("openai", &["4"], test_usage())).await;
    seed_prompt(&router, &auth).await;

    let response = AxumTestRequest::post("/api/chats/c1/submit?provider=openai")
        .json(&json!({"prompt": "q", "promptId": "p1"}))
        .send(router)
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Cache Idempotence
// ============================================================================

#[tokio::test]
async fn test_repeated_submits_replay_without_regenerating() {
    let generator = ScriptedGenerator::succeeding("openai", &["The answer is 4."], test_usage());
    let calls = generator.call_counter();
    let (router, auth) = setup_with_generator(generator).await;
    seed_prompt(&router, &auth).await;

    let mut bodies = Vec::new();
    for _ in 0..3 {
        let response = submit_request(&auth).send(router.clone()).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        bodies.push(response.text());
    }

    // One upstream generation; replays byte-identical, trailer included
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);

    let (text, usage) = strip_trailer(&bodies[2]);
    assert_eq!(text, "The answer is 4.");
    assert!(usage.is_some());
}

#[tokio::test]
async fn test_concurrent_duplicate_submits_generate_once() {
    // Slow generation so the duplicate lands while the first is in flight
    let generator = ScriptedGenerator::from_steps(
        "openai",
        vec![
            ScriptStep::Delta("thinking "),
            ScriptStep::Pause(Duration::from_millis(150)),
            ScriptStep::Delta("4"),
            ScriptStep::Finish { usage: Some(test_usage()) },
        ],
    );
    let calls = generator.call_counter();
    let (router, auth) = setup_with_generator(generator).await;
    seed_prompt(&router, &auth).await;

    let (a, b) = tokio::join!(
        submit_request(&auth).send(router.clone()),
        submit_request(&auth).send(router.clone()),
    );

    let mut statuses = [a.status(), b.status()];
    statuses.sort_unstable();
    assert_eq!(statuses, [200, 409]);

    // Exactly one upstream generation call for the pair
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Upstream Failures
// ============================================================================

#[tokio::test]
async fn test_rate_limited_upstream_surfaces_429() {
    let (router, auth) =
        setup_with_generator(ScriptedGenerator::failing_open("openai", 429, "slow down")).await;
    seed_prompt(&router, &auth).await;

    let response = submit_request(&auth).send(router).await;
    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);

    let body: serde_json::Value = response.json();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("wait and try again"));
}

#[tokio::test]
async fn test_upstream_status_mirrored() {
    let (router, auth) =
        setup_with_generator(ScriptedGenerator::failing_open("openai", 503, "down")).await;
    seed_prompt(&router, &auth).await;

    let response = submit_request(&auth).send(router).await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_error_then_retry_regenerates() {
    // First submission fails upstream; the retry must reach the model
    // again instead of replaying the error
    let generator = ScriptedGenerator::failing_open("openai", 503, "down");
    let calls = generator.call_counter();
    let (router, auth) = setup_with_generator(generator).await;
    seed_prompt(&router, &auth).await;

    let first = submit_request(&auth).send(router.clone()).await;
    assert_eq!(first.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    let second = submit_request(&auth).send(router).await;
    assert_eq!(second.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    // Both requests hit the upstream: the error row was cleared in between
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
