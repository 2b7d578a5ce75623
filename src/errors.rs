// ABOUTME: Unified error handling with stable error codes and HTTP response mapping
// ABOUTME: Every fallible path in the crate surfaces an AppError with a typed ErrorCode
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Unified Error Handling
//!
//! Central error type for the service. Each [`ErrorCode`] maps to exactly one
//! HTTP status, except [`ErrorCode::UpstreamError`] which mirrors the status
//! reported by the upstream model provider when one is available.
//!
//! Errors local to one provider's stream never propagate to the other
//! concurrent streams for the same prompt; handlers convert an `AppError`
//! into a JSON [`ErrorResponse`] scoped to the single failing request.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Standard error codes used throughout the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Authentication (1000-1999)
    /// No credentials were presented
    #[serde(rename = "AUTH_REQUIRED")]
    AuthRequired = 1000,
    /// Credentials were presented but are invalid or expired
    #[serde(rename = "AUTH_INVALID")]
    AuthInvalid = 1001,

    // Validation (3000-3999)
    /// The provided input is invalid
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput = 3000,
    /// A required field is missing from the request body
    #[serde(rename = "MISSING_REQUIRED_FIELD")]
    MissingRequiredField = 3001,
    /// The provider id is not in the registry
    #[serde(rename = "UNKNOWN_PROVIDER")]
    UnknownProvider = 3002,

    // Resources (4000-4999)
    /// Chat or prompt missing, or not owned by the caller
    #[serde(rename = "RESOURCE_NOT_FOUND")]
    ResourceNotFound = 4000,
    /// Another request holds the generation reservation for this pair
    #[serde(rename = "GENERATION_IN_PROGRESS")]
    GenerationInProgress = 4001,

    // Upstream providers (5000-5999)
    /// The upstream model provider returned a rate-limit signal
    #[serde(rename = "UPSTREAM_RATE_LIMITED")]
    UpstreamRateLimited = 5000,
    /// Any other upstream provider failure
    #[serde(rename = "UPSTREAM_ERROR")]
    UpstreamError = 5001,

    // Configuration (6000-6999)
    /// Configuration error encountered at startup
    #[serde(rename = "CONFIG_ERROR")]
    ConfigError = 6000,

    // Client lifecycle (7000-7999)
    /// The client abandoned the connection; not a user-facing failure
    #[serde(rename = "CLIENT_DISCONNECTED")]
    ClientDisconnected = 7000,

    // Internal (9000-9999)
    /// An internal server error occurred
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9000,
    /// Database operation failed
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError = 9001,
    /// Data serialization/deserialization failed
    #[serde(rename = "SERIALIZATION_ERROR")]
    SerializationError = 9003,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput | Self::MissingRequiredField | Self::UnknownProvider => 400,
            Self::AuthRequired | Self::AuthInvalid => 401,
            Self::ResourceNotFound => 404,
            Self::GenerationInProgress => 409,
            Self::UpstreamRateLimited => 429,
            // Client Closed Request (nginx convention); carries no body
            Self::ClientDisconnected => 499,
            Self::UpstreamError => 502,
            Self::ConfigError
            | Self::InternalError
            | Self::DatabaseError
            | Self::SerializationError => 500,
        }
    }

    /// Get a user-facing description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AuthRequired => "Authentication is required to access this resource",
            Self::AuthInvalid => "The provided authentication credentials are invalid",
            Self::InvalidInput => "The provided input is invalid",
            Self::MissingRequiredField => "A required field is missing from the request",
            Self::UnknownProvider => "The requested provider is not supported",
            Self::ResourceNotFound => "The requested resource was not found",
            Self::GenerationInProgress => "A response is already being generated for this prompt",
            Self::UpstreamRateLimited => "The model provider rate limit was exceeded",
            Self::UpstreamError => "The model provider encountered an error",
            Self::ConfigError => "Configuration error encountered",
            Self::ClientDisconnected => "The client closed the connection",
            Self::InternalError => "An internal server error occurred",
            Self::DatabaseError => "Database operation failed",
            Self::SerializationError => "Data serialization/deserialization failed",
        }
    }
}

/// Unified error type for the application
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status reported by the upstream provider, when one exists.
    /// Only consulted for [`ErrorCode::UpstreamError`].
    pub upstream_status: Option<u16>,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            upstream_status: None,
            source: None,
        }
    }

    /// Attach the HTTP status the upstream provider reported
    #[must_use]
    pub const fn with_upstream_status(mut self, status: u16) -> Self {
        self.upstream_status = Some(status);
        self
    }

    /// Add a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the HTTP status code for this error
    ///
    /// [`ErrorCode::UpstreamError`] mirrors the upstream provider's status
    /// when one was captured, per the wire contract.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        if self.code == ErrorCode::UpstreamError {
            if let Some(status) = self.upstream_status {
                return status;
            }
        }
        self.code.http_status()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorResponseDetails,
}

/// Body of an [`ErrorResponse`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponseDetails {
    /// Stable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        Self {
            error: ErrorResponseDetails {
                code: error.code,
                message: error.message.clone(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // A disconnected client is not listening; send status only.
        if self.code == ErrorCode::ClientDisconnected {
            return status.into_response();
        }

        (status, axum::Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Convenience constructors for common errors
impl AppError {
    /// Authentication required
    #[must_use]
    pub fn auth_required() -> Self {
        Self::new(ErrorCode::AuthRequired, "Authentication required")
    }

    /// Invalid authentication
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    /// Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Required field missing from the request body
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{field} is required"),
        )
    }

    /// Unknown provider id
    pub fn unknown_provider(provider: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::UnknownProvider,
            format!("Invalid provider: {}", provider.into()),
        )
    }

    /// Resource not found
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// A concurrent request already holds the generation reservation
    pub fn generation_in_progress(prompt_id: &str, provider: &str) -> Self {
        Self::new(
            ErrorCode::GenerationInProgress,
            format!("Generation already in progress for prompt {prompt_id} ({provider})"),
        )
    }

    /// Upstream provider rate limited the request
    #[must_use]
    pub fn upstream_rate_limited() -> Self {
        Self::new(
            ErrorCode::UpstreamRateLimited,
            "Rate limited. Please wait and try again.",
        )
    }

    /// Upstream provider failure with the provider name for context
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::UpstreamError,
            format!("{}: {}", provider.into(), message.into()),
        )
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorCode::SerializationError, error.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::new(ErrorCode::DatabaseError, error.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::AuthRequired.http_status(), 401);
        assert_eq!(ErrorCode::UnknownProvider.http_status(), 400);
        assert_eq!(ErrorCode::ResourceNotFound.http_status(), 404);
        assert_eq!(ErrorCode::GenerationInProgress.http_status(), 409);
        assert_eq!(ErrorCode::UpstreamRateLimited.http_status(), 429);
        assert_eq!(ErrorCode::ClientDisconnected.http_status(), 499);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
    }

    #[test]
    fn test_upstream_status_mirroring() {
        let error = AppError::upstream("openai", "service melted").with_upstream_status(503);
        assert_eq!(error.http_status(), 503);

        // Without a captured status the generic mapping applies
        let error = AppError::upstream("openai", "connection refused");
        assert_eq!(error.http_status(), 502);

        // Mirroring is scoped to upstream failures only
        let error = AppError::not_found("Chat").with_upstream_status(503);
        assert_eq!(error.http_status(), 404);
    }

    #[test]
    fn test_error_response_serialization() {
        let error = AppError::unknown_provider("mistral");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("UNKNOWN_PROVIDER"));
        assert!(json.contains("mistral"));
    }
}
