//! Client-credentials token acquisition.
//!
//! [`ClientCredentialsSource`] exchanges an application's tenant id,
//! client id and client secret for a directory-scoped bearer token, and
//! caches it until shortly before it expires.
//!
//! # Features
//!
//! This module is only available when the `oauth` feature is enabled.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl,
    basic::BasicClient, reqwest::async_http_client,
};
use parking_lot::Mutex;
use url::Url;

use crate::secret::Secret;
use crate::token::{AccessToken, TokenError, TokenSource};

/// Tokens within this many minutes of expiry are fetched again.
const REFRESH_BUFFER_MINUTES: i64 = 5;

/// Derive the `.default` scope for a directory API base URL.
///
/// `https://graph.microsoft.com/v1.0` becomes
/// `https://graph.microsoft.com/.default`.
pub fn default_scope(directory_base_url: &str) -> Result<String, TokenError> {
    let url = Url::parse(directory_base_url).map_err(|e| TokenError::InvalidUrl {
        message: format!("{}: {}", directory_base_url, e),
    })?;
    Ok(format!("{}/.default", url.origin().ascii_serialization()))
}

/// Create an OAuth2 client for a tenant's v2.0 endpoints.
fn create_oauth_client(
    authority_host: &str,
    tenant_id: &str,
    client_id: &str,
    client_secret: &Secret,
) -> Result<BasicClient, TokenError> {
    let base = format!("{}/{}/oauth2/v2.0", authority_host.trim_end_matches('/'), tenant_id);

    let auth_url = AuthUrl::new(format!("{}/authorize", base)).map_err(|e| {
        TokenError::InvalidUrl {
            message: format!("invalid auth URL: {}", e),
        }
    })?;

    let token_url = TokenUrl::new(format!("{}/token", base)).map_err(|e| {
        TokenError::InvalidUrl {
            message: format!("invalid token URL: {}", e),
        }
    })?;

    let client = BasicClient::new(
        ClientId::new(client_id.to_string()),
        Some(ClientSecret::new(client_secret.expose().to_string())),
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody);

    Ok(client)
}

/// Token source backed by the OAuth 2.0 client-credentials grant.
pub struct ClientCredentialsSource {
    client: BasicClient,
    scope: String,
    timeout: std::time::Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl ClientCredentialsSource {
    /// Create a new source.
    ///
    /// # Arguments
    ///
    /// * `authority_host` - e.g. [`DEFAULT_AUTHORITY_HOST`](crate::config::DEFAULT_AUTHORITY_HOST)
    /// * `tenant_id` - Directory (tenant) id
    /// * `client_id` - Application (client) id of the monitoring app
    /// * `client_secret` - Its client secret
    /// * `scope` - Usually [`default_scope`] of the directory base URL
    pub fn new(
        authority_host: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &Secret,
        scope: impl Into<String>,
    ) -> Result<Self, TokenError> {
        if tenant_id.trim().is_empty() {
            return Err(TokenError::MissingField { field: "tenant_id" });
        }
        if client_id.trim().is_empty() {
            return Err(TokenError::MissingField { field: "client_id" });
        }
        if client_secret.is_blank() {
            return Err(TokenError::MissingField { field: "client_secret" });
        }

        Ok(Self {
            client: create_oauth_client(authority_host, tenant_id, client_id, client_secret)?,
            scope: scope.into(),
            timeout: std::time::Duration::from_secs(30),
            cached: Mutex::new(None),
        })
    }

    /// Bound each token request by `timeout`.
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request_token(&self) -> Result<AccessToken, TokenError> {
        let request = self
            .client
            .exchange_client_credentials()
            .add_scope(Scope::new(self.scope.clone()))
            .request_async(async_http_client);

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| TokenError::RequestFailed {
                message: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| TokenError::RequestFailed {
                message: e.to_string(),
            })?;

        let mut token = AccessToken::new(response.access_token().secret().to_string());
        if let Some(expires_in) = response.expires_in() {
            if let Ok(expires_in) = Duration::from_std(expires_in) {
                token = token.with_expiry(Utc::now() + expires_in);
            }
        }

        Ok(token)
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn access_token(&self) -> Result<AccessToken, TokenError> {
        let buffer = Duration::minutes(REFRESH_BUFFER_MINUTES);

        let cached = self.cached.lock().clone();
        if let Some(token) = cached {
            if !token.expires_within(buffer) {
                return Ok(token);
            }
        }

        tracing::debug!(scope = %self.scope, "Requesting client-credentials token");
        let token = self.request_token().await?;
        *self.cached.lock() = Some(token.clone());
        Ok(token)
    }
}
