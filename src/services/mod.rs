// ABOUTME: Service layer exposing the streaming response orchestrator
// ABOUTME: Sits between HTTP handlers and the provider/persistence layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! Business-logic services

pub mod streaming;

pub use streaming::{replay_cached, stream_generation};
