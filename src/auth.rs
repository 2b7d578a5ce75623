// ABOUTME: JWT bearer-token validation establishing the per-request tenancy boundary
// ABOUTME: Tokens are issued by an external identity provider sharing the HS256 secret
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Authentication
//!
//! The service performs no identity logic of its own: an external identity
//! provider issues HS256 JWTs whose `sub` claim is the user id, and this
//! module validates them. The validated `sub` is the tenancy boundary —
//! every database read and write is scoped by it.

use crate::errors::{AppError, AppResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// `JWT` claims for user authentication
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id assigned by the identity provider
    pub sub: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

/// Result of authenticating a request
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Authenticated user id
    pub user_id: String,
}

/// Authentication manager validating bearer `JWT`s
#[derive(Clone)]
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiry_hours: u64,
}

impl AuthManager {
    /// Create a new authentication manager from the shared HS256 secret
    #[must_use]
    pub fn new(jwt_secret: &[u8], token_expiry_hours: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret),
            decoding_key: DecodingKey::from_secret(jwt_secret),
            token_expiry_hours,
        }
    }

    /// Generate a token for a user id
    ///
    /// Token issuance normally lives in the external identity provider;
    /// this is used by tests and local tooling that share the secret.
    ///
    /// # Errors
    ///
    /// Returns an error if JWT encoding fails.
    pub fn generate_token(&self, user_id: &str) -> AppResult<String> {
        let now = Utc::now();
        let expiry = now + Duration::hours(self.token_expiry_hours as i64);

        let claims = Claims {
            sub: user_id.to_owned(),
            iat: now.timestamp(),
            exp: expiry.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to encode JWT: {e}")))
    }

    /// Validate a token and return its claims
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorCode::AuthInvalid`] for malformed,
    /// tampered, or expired tokens.
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::auth_invalid(format!("Invalid token: {e}")))
    }

    /// Authenticate a request from its headers
    ///
    /// Accepts `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ErrorCode::AuthRequired`] when no header is
    /// present and [`crate::errors::ErrorCode::AuthInvalid`] when the token
    /// does not validate.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> AppResult<AuthResult> {
        let header = headers
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(AppError::auth_required)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::auth_invalid("Authorization header must be a bearer token"))?;

        let claims = self.validate_token(token)?;
        Ok(AuthResult {
            user_id: claims.sub,
        })
    }
}
