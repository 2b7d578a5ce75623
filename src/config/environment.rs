// ABOUTME: Environment-only server configuration with typed sections per concern
// ABOUTME: Reads HTTP, database, auth, and provider credential settings from env vars
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Environment Configuration
//!
//! Configuration is environment-only: every setting is read from an
//! environment variable with a sensible development default, except
//! secrets (JWT secret, provider API keys) which are required.

use crate::errors::{AppError, AppResult};
use std::env;

/// Default HTTP port when `HTTP_PORT` is unset
const DEFAULT_HTTP_PORT: u16 = 8081;

/// Default SQLite database URL
const DEFAULT_DATABASE_URL: &str = "sqlite:./data/triptych.db";

/// Default JWT expiry in hours
const DEFAULT_JWT_EXPIRY_HOURS: u64 = 24;

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Database settings
    pub database: DatabaseConfig,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Per-provider upstream credentials
    pub openai: ProviderCredentials,
    /// Anthropic credentials
    pub anthropic: ProviderCredentials,
    /// xAI credentials
    pub xai: ProviderCredentials,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL (SQLite)
    pub url: String,
}

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 secret shared with the external identity provider
    pub jwt_secret: String,
    /// Token lifetime accepted by the validator, in hours
    pub jwt_expiry_hours: u64,
}

/// Credentials and endpoint for one upstream model provider
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    /// API key sent as a bearer/API-key header
    pub api_key: String,
    /// Base URL of the provider API
    pub base_url: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required secret is missing or a numeric
    /// variable cannot be parsed.
    pub fn from_env() -> AppResult<Self> {
        let http_port = match env::var("HTTP_PORT") {
            Ok(value) => value
                .parse()
                .map_err(|_| AppError::config(format!("Invalid HTTP_PORT: {value}")))?,
            Err(_) => DEFAULT_HTTP_PORT,
        };

        let jwt_expiry_hours = match env::var("JWT_EXPIRY_HOURS") {
            Ok(value) => value
                .parse()
                .map_err(|_| AppError::config(format!("Invalid JWT_EXPIRY_HOURS: {value}")))?,
            Err(_) => DEFAULT_JWT_EXPIRY_HOURS,
        };

        Ok(Self {
            http_port,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
            },
            auth: AuthConfig {
                jwt_secret: require_env("JWT_SECRET")?,
                jwt_expiry_hours,
            },
            openai: ProviderCredentials {
                api_key: require_env("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            },
            anthropic: ProviderCredentials {
                api_key: require_env("ANTHROPIC_API_KEY")?,
                base_url: env::var("ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|_| "https://api.anthropic.com".into()),
            },
            xai: ProviderCredentials {
                api_key: require_env("XAI_API_KEY")?,
                base_url: env::var("XAI_BASE_URL").unwrap_or_else(|_| "https://api.x.ai/v1".into()),
            },
        })
    }

    /// One-line startup summary with secrets elided
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "port={} database={} jwt_expiry={}h providers=[openai@{}, anthropic@{}, xai@{}]",
            self.http_port,
            self.database.url,
            self.auth.jwt_expiry_hours,
            self.openai.base_url,
            self.anthropic.base_url,
            self.xai.base_url,
        )
    }
}

fn require_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::config(format!("Missing {name} environment variable")))
}
