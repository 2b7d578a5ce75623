// ABOUTME: Test helper modules: axum request builder and scripted generators
// ABOUTME: Shared across integration test binaries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors
#![allow(dead_code)]

pub mod axum_test;
pub mod scripted;
