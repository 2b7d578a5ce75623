// ABOUTME: Shared server resources and the HTTP serve loop
// ABOUTME: One Arc<ServerResources> is threaded through every route handler
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! Server assembly: resource container and run loop.

use std::sync::Arc;

use anyhow::Result;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthManager;
use crate::database::Database;
use crate::llm::ProviderRegistry;
use crate::routes;

/// Shared resources available to every request handler
pub struct ServerResources {
    /// Database pool and stores
    pub database: Database,
    /// Bearer-token validator
    pub auth: AuthManager,
    /// Catalog of upstream providers
    pub registry: ProviderRegistry,
}

impl ServerResources {
    /// Bundle the server's long-lived resources
    #[must_use]
    pub fn new(database: Database, auth: AuthManager, registry: ProviderRegistry) -> Self {
        Self {
            database,
            auth,
            registry,
        }
    }
}

/// Serve the HTTP API until ctrl-c
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn run(resources: Arc<ServerResources>, http_port: u16) -> Result<()> {
    let app = routes::router(resources).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await?;
    info!("Listening on port {http_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
