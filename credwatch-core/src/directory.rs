//! Application registration enumeration.
//!
//! This module provides:
//! - [`Application`], [`PasswordCredential`], [`ApplicationPage`] - Provider payloads
//! - [`ApplicationSource`] - Trait for fetching one page of applications
//! - [`DirectoryClient`] - HTTP implementation against a directory API
//! - [`fetch_all_records`] - Exhaustive, sequential pagination
//! - [`flatten`] - One [`CredentialRecord`] per (application, secret)
//!
//! Every provider field is optional; the substitution rule for each one
//! lives in [`flatten`] and nowhere else.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::expiry::days_to_expire;
use crate::model::{CredentialRecord, DaysToExpire, NOT_AVAILABLE};
use crate::token::{TokenError, TokenSource};

/// Public-cloud directory API root.
pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Applications requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

const SELECT_FIELDS: &str = "displayName,appId,createdDateTime,passwordCredentials";

/// Error type for directory enumeration.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the connection failed.
    #[error("directory request failed: {message}")]
    Transport { message: String },

    /// The request exceeded its timeout.
    #[error("directory request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The directory answered with a non-success status.
    #[error("directory returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not match the expected schema.
    #[error("could not decode directory response: {message}")]
    Decode { message: String },

    /// No bearer token could be obtained.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// A continuation link was returned twice.
    #[error("pagination loop detected at {link}")]
    PaginationLoop { link: String },

    /// The configured base URL or a continuation link is not a URL.
    #[error("invalid directory URL: {message}")]
    InvalidUrl { message: String },
}

/// A client secret attached to an application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordCredential {
    #[serde(default)]
    pub key_id: Option<String>,

    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub display_name: Option<String>,
}

/// An application registration as returned by the directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub app_id: Option<String>,

    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub password_credentials: Option<Vec<PasswordCredential>>,
}

/// One page of a paginated application collection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationPage {
    #[serde(default)]
    pub value: Vec<Application>,

    /// Opaque continuation link; absent on the last page.
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

/// Anything that can return one page of application registrations.
///
/// `cursor` is `None` for the first page and otherwise the continuation
/// returned by the previous page.
#[async_trait]
pub trait ApplicationSource: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<ApplicationPage, FetchError>;
}

/// Directory API client.
///
/// # Type Parameters
///
/// * `T` - Where bearer tokens come from
pub struct DirectoryClient<T: TokenSource> {
    base_url: String,
    page_size: u32,
    timeout: Duration,
    tokens: T,
    http: reqwest::Client,
}

impl<T: TokenSource> DirectoryClient<T> {
    /// Create a client for `base_url` (e.g. [`DEFAULT_BASE_URL`] or a
    /// sovereign-cloud endpoint).
    pub fn new(base_url: impl Into<String>, tokens: T) -> Self {
        Self {
            base_url: base_url.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(30),
            tokens,
            http: reqwest::Client::new(),
        }
    }

    /// Bound each page request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request `page_size` applications per page.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn first_page_url(&self) -> Result<Url, FetchError> {
        let raw = format!("{}/applications", self.base_url.trim_end_matches('/'));
        let mut url = Url::parse(&raw).map_err(|e| FetchError::InvalidUrl {
            message: format!("{}: {}", raw, e),
        })?;
        url.query_pairs_mut()
            .append_pair("$select", SELECT_FIELDS)
            .append_pair("$top", &self.page_size.to_string());
        Ok(url)
    }

    fn transport_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            FetchError::Transport {
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl<T: TokenSource> ApplicationSource for DirectoryClient<T> {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<ApplicationPage, FetchError> {
        let url = match cursor {
            Some(next) => Url::parse(next).map_err(|e| FetchError::InvalidUrl {
                message: format!("{}: {}", next, e),
            })?,
            None => self.first_page_url()?,
        };

        let token = self.tokens.access_token().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token.secret.expose())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ApplicationPage>()
            .await
            .map_err(|e| match self.transport_error(e) {
                timeout @ FetchError::Timeout { .. } => timeout,
                other => FetchError::Decode {
                    message: other.to_string(),
                },
            })
    }
}

/// Fetch every page from `source` and flatten the applications.
///
/// Pages are requested strictly one after another. Any page failure
/// aborts the whole enumeration; a partial directory is never returned.
pub async fn fetch_all_records<S>(
    source: &S,
    now: DateTime<Utc>,
) -> Result<Vec<CredentialRecord>, FetchError>
where
    S: ApplicationSource + ?Sized,
{
    let mut records = Vec::new();
    let mut seen_links = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;
    let mut applications = 0usize;

    loop {
        let page = source.fetch_page(cursor.as_deref()).await?;
        pages += 1;
        applications += page.value.len();
        debug!(page = pages, applications = page.value.len(), "Fetched directory page");

        records.extend(flatten(&page.value, now));

        match page.next_link {
            Some(link) => {
                if !seen_links.insert(link.clone()) {
                    return Err(FetchError::PaginationLoop { link });
                }
                cursor = Some(link);
            }
            None => break,
        }
    }

    info!(pages, applications, records = records.len(), "Directory enumeration complete");
    Ok(records)
}

/// Turn applications into credential records.
///
/// - Missing display name or app id becomes `"N/A"`.
/// - An application without secrets yields one sentinel row.
/// - A secret without a key id is reported but never given a day count.
/// - Days are computed against the single `now` passed in.
pub fn flatten(applications: &[Application], now: DateTime<Utc>) -> Vec<CredentialRecord> {
    let mut records = Vec::new();

    for app in applications {
        let display_name = app.display_name.as_deref().unwrap_or(NOT_AVAILABLE);
        let app_id = app.app_id.as_deref().unwrap_or(NOT_AVAILABLE);
        let credentials = app.password_credentials.as_deref().unwrap_or_default();

        if credentials.is_empty() {
            records.push(CredentialRecord::without_secret(
                display_name,
                app_id,
                app.created_date_time,
            ));
            continue;
        }

        for credential in credentials {
            let has_secret = credential
                .key_id
                .as_deref()
                .is_some_and(|id| !id.is_empty());

            let days = match credential.end_date_time {
                Some(end) if has_secret => DaysToExpire::Days(days_to_expire(end, now)),
                _ => DaysToExpire::Unknown,
            };

            records.push(CredentialRecord {
                display_name: display_name.to_string(),
                app_id: app_id.to_string(),
                created_time: app.created_date_time,
                has_secret,
                end_date: credential.end_date_time,
                days_to_expire: days,
            });
        }
    }

    records
}
