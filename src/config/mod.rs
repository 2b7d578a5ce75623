// ABOUTME: Configuration module exposing environment-driven server settings
// ABOUTME: All configuration comes from environment variables, no config files
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! Server configuration

pub mod environment;

pub use environment::{AuthConfig, DatabaseConfig, ProviderCredentials, ServerConfig};
