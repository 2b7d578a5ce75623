// ABOUTME: Liveness endpoint reporting service name and version
// ABOUTME: Unauthenticated; used by deploy checks and the CLI's connectivity probe
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! Health check route

use axum::{routing::get, Json, Router};
use serde_json::json;

/// Health check routes
#[must_use]
pub fn routes() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
