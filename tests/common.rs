// ABOUTME: Shared test utilities: in-memory database, auth tokens, scripted providers
// ABOUTME: Provides common setup to reduce duplication across integration tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors
#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

//! Shared test utilities for `triptych`

use std::net::SocketAddr;
use std::sync::{Arc, Once};

use triptych::auth::AuthManager;
use triptych::database::Database;
use triptych::llm::ProviderRegistry;
use triptych::server::ServerResources;

static INIT_LOGGER: Once = Once::new();

/// Shared JWT secret for tests
pub const TEST_JWT_SECRET: &[u8] = b"test-secret-at-least-32-bytes-long!!";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Standard test database setup
pub async fn create_test_database() -> Database {
    init_test_logging();
    Database::new("sqlite::memory:")
        .await
        .expect("Failed to create test database")
}

/// Create a test authentication manager
pub fn create_test_auth_manager() -> AuthManager {
    AuthManager::new(TEST_JWT_SECRET, 24)
}

/// Bundle server resources around a scripted registry
pub async fn create_test_resources(registry: ProviderRegistry) -> Arc<ServerResources> {
    let database = create_test_database().await;
    let auth = create_test_auth_manager();
    Arc::new(ServerResources::new(database, auth, registry))
}

/// Generate a bearer header value for a user id
pub fn bearer_for(resources: &ServerResources, user_id: &str) -> String {
    format!("Bearer {}", token_for(resources, user_id))
}

/// Raw token (no Bearer prefix) for the API client
pub fn token_for(resources: &ServerResources, user_id: &str) -> String {
    resources
        .auth
        .generate_token(user_id)
        .expect("Failed to generate test token")
}

/// Serve the full router on an ephemeral port, returning its address
///
/// The fan-out coordinator and API client speak real HTTP, so their tests
/// run against a listening server rather than router oneshots.
pub async fn spawn_test_server(resources: Arc<ServerResources>) -> SocketAddr {
    let app = triptych::routes::router(resources);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    addr
}
