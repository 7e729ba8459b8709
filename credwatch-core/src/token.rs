//! Bearer token capability for the directory API.
//!
//! This module provides:
//! - [`AccessToken`] - A bearer token with its expiry
//! - [`TokenSource`] - Trait for anything that can hand out a usable token
//! - [`StaticTokenSource`] - A pre-acquired token (tests, external auth)
//! - [`TokenError`] - Failures while obtaining a token
//!
//! The pipeline never inspects how a token was obtained; it only asks a
//! [`TokenSource`] for one before each directory request.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::secret::Secret;

/// Error type for token acquisition.
#[derive(Debug, Error)]
pub enum TokenError {
    /// A required identity field is empty.
    #[error("missing identity field: {field}")]
    MissingField { field: &'static str },

    /// An authority or scope URL could not be parsed.
    #[error("invalid URL: {message}")]
    InvalidUrl { message: String },

    /// The token endpoint rejected the request or could not be reached.
    #[error("token request failed: {message}")]
    RequestFailed { message: String },
}

/// A bearer token and, if known, when it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The token value.
    pub secret: Secret,

    /// When this token expires (None if unknown).
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Create a token with no known expiry.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            secret: Secret::new(value),
            expires_at: None,
        }
    }

    /// Set the expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if this token will expire within the given duration.
    ///
    /// Returns `false` if no expiration is set.
    pub fn expires_within(&self, duration: Duration) -> bool {
        self.expires_at
            .map(|exp| exp < Utc::now() + duration)
            .unwrap_or(false)
    }
}

/// Source of bearer tokens for the directory API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a token that is valid for at least the next request.
    async fn access_token(&self) -> Result<AccessToken, TokenError>;
}

/// A token obtained elsewhere and handed to the pipeline as-is.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: AccessToken,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<AccessToken, TokenError> {
        Ok(self.token.clone())
    }
}
