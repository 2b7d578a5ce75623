// ABOUTME: Client-side library: API client and the fan-out streaming coordinator
// ABOUTME: Drives one submit stream per provider concurrently and settles against storage
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Client Library
//!
//! The consumer side of the wire protocol: a typed [`ApiClient`] for the
//! HTTP surface and a [`FanOutCoordinator`] that, for one prompt, drives
//! one submit stream per registered provider concurrently, strips the
//! metadata trailer, aggregates per-provider completion, and declares the
//! prompt settled only after reconciling with server-persisted state.

pub mod api;
pub mod fanout;

pub use api::ApiClient;
pub use fanout::{FanOutCoordinator, ProviderOutcome, SessionEvent};
