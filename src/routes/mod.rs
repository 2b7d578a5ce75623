// ABOUTME: HTTP route assembly for the chat API
// ABOUTME: Chat CRUD, prompt submission, the streaming submit endpoint, and health
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! HTTP routes

pub mod chats;
pub mod health;
pub mod submit;

use std::sync::Arc;

use axum::Router;

use crate::server::ServerResources;

/// Build the full application router
#[must_use]
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(chats::ChatRoutes::routes(resources.clone()))
        .merge(submit::routes(resources))
}
