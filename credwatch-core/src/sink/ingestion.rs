//! Signed upload of the selected batch to a log-ingestion API.
//!
//! The request is authenticated with a shared-key HMAC-SHA256 signature
//! over a canonical string:
//!
//! ```text
//! POST\n{content-length}\napplication/json\nx-ms-date:{rfc1123 date}\n/api/logs
//! ```
//!
//! The digest is computed with the base64-decoded shared key and sent as
//! `Authorization: SharedKey {workspace id}:{base64 digest}`. The same
//! date string must be sent in the `x-ms-date` header.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info};

use crate::config::IngestionSettings;
use crate::secret::Secret;
use crate::sink::{RunReport, Sink, SinkError, SinkOutcome};

/// Resource path that is both requested and signed.
pub const RESOURCE_PATH: &str = "/api/logs";

/// Content type that is both sent and signed.
pub const CONTENT_TYPE: &str = "application/json";

/// Data collector API version.
pub const API_VERSION: &str = "2016-04-01";

/// Custom log table name used when none is configured.
pub const DEFAULT_LOG_TYPE: &str = "AppRegistrationExpiry";

type HmacSha256 = Hmac<Sha256>;

/// Format an instant as an RFC 1123 date, e.g. `Mon, 01 Jan 2024 00:00:00 GMT`.
pub fn rfc1123_date(instant: DateTime<Utc>) -> String {
    instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the `Authorization` header value for one request.
///
/// # Arguments
///
/// * `workspace_id` - Workspace (endpoint) id
/// * `shared_key` - Base64-encoded shared key
/// * `date` - The exact RFC 1123 string sent in `x-ms-date`
/// * `content_length` - Body length in bytes
/// * `method`, `content_type`, `resource` - As sent on the wire
pub fn build_signature(
    workspace_id: &str,
    shared_key: &Secret,
    date: &str,
    content_length: usize,
    method: &str,
    content_type: &str,
    resource: &str,
) -> Result<String, SinkError> {
    let string_to_hash = format!(
        "{}\n{}\n{}\nx-ms-date:{}\n{}",
        method, content_length, content_type, date, resource
    );

    let key = STANDARD
        .decode(shared_key.expose())
        .map_err(|e| SinkError::config(format!("shared key is not valid base64: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| SinkError::config(format!("unusable shared key: {}", e)))?;
    mac.update(string_to_hash.as_bytes());
    let digest = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!("SharedKey {}:{}", workspace_id, digest))
}

/// Uploads the selected records as one JSON array per run.
pub struct LogIngestionSink {
    workspace_id: String,
    shared_key: Secret,
    log_type: String,
    endpoint: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl LogIngestionSink {
    /// Create a sink from its settings.
    ///
    /// Fails when the workspace id or shared key is missing, or the key is
    /// not base64.
    pub fn new(settings: &IngestionSettings) -> Result<Self, SinkError> {
        let workspace_id = settings.endpoint_id.trim();
        if workspace_id.is_empty() {
            return Err(SinkError::config("ingestion_sink.endpoint_id is not set"));
        }

        let shared_key = match &settings.shared_key {
            Some(key) if !key.is_blank() => key.clone(),
            _ => return Err(SinkError::config("ingestion_sink.shared_key is not set")),
        };
        // Reject an undecodable key up front rather than on first publish.
        build_signature(workspace_id, &shared_key, "", 0, "POST", CONTENT_TYPE, RESOURCE_PATH)?;

        let base = settings
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.ods.opinsights.azure.com", workspace_id));
        let endpoint = format!(
            "{}{}?api-version={}",
            base.trim_end_matches('/'),
            RESOURCE_PATH,
            API_VERSION
        );

        Ok(Self {
            workspace_id: workspace_id.to_string(),
            shared_key,
            log_type: settings.log_type.clone(),
            endpoint,
            timeout: Duration::from_secs(30),
            http: reqwest::Client::new(),
        })
    }

    /// Bound the upload by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Sink for LogIngestionSink {
    fn name(&self) -> &str {
        "log-ingestion"
    }

    async fn publish(&self, run: &RunReport) -> Result<SinkOutcome, SinkError> {
        if run.records.is_empty() {
            return Ok(SinkOutcome::skipped("no records to upload"));
        }

        let body = serde_json::to_vec(&run.records).map_err(|e| SinkError::Transport {
            message: format!("could not serialize records: {}", e),
        })?;

        let date = rfc1123_date(Utc::now());
        let signature = build_signature(
            &self.workspace_id,
            &self.shared_key,
            &date,
            body.len(),
            "POST",
            CONTENT_TYPE,
            RESOURCE_PATH,
        )?;

        debug!(endpoint = %self.endpoint, bytes = body.len(), "Uploading batch");

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(reqwest::header::AUTHORIZATION, signature)
            .header("Log-Type", &self.log_type)
            .header("x-ms-date", &date)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout {
                        seconds: self.timeout.as_secs(),
                    }
                } else {
                    SinkError::Transport {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(records = run.records.len(), log_type = %self.log_type, "Uploaded batch to log ingestion");
        Ok(SinkOutcome::delivered(format!(
            "uploaded {} records",
            run.records.len()
        )))
    }
}
