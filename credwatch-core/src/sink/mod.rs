//! Report delivery targets.
//!
//! This module provides:
//! - [`Sink`] - Trait every delivery target implements
//! - [`RunReport`] - The immutable batch handed to each sink
//! - [`SinkOutcome`] / [`SinkError`] - What happened on delivery
//! - [`ingestion::LogIngestionSink`] - Signed upload to a log-ingestion API
//! - [`email::EmailSink`] (with `email` feature) - SMTP report mail
//!
//! Sinks never see each other's state. A failing sink is reported to the
//! orchestrator as an error value; it never aborts the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::CredentialRecord;
use crate::report::Report;

pub mod ingestion;

#[cfg(feature = "email")]
pub mod email;

pub use ingestion::LogIngestionSink;

#[cfg(feature = "email")]
pub use email::EmailSink;

/// Everything a sink may need from one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Selected (expiring or expired) records, in selection order.
    pub records: Vec<CredentialRecord>,

    /// Rendered plain and HTML forms.
    pub report: Report,

    /// The run's single "now".
    pub generated_at: DateTime<Utc>,
}

/// Result of a sink attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// The sink accepted the batch.
    Delivered { detail: String },

    /// Nothing was sent (disabled, or nothing to send).
    Skipped { reason: String },
}

impl SinkOutcome {
    pub fn delivered(detail: impl Into<String>) -> Self {
        Self::Delivered {
            detail: detail.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

/// Error type for sink delivery.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The sink's settings are incomplete or invalid.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The remote end rejected our credentials.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Connection, TLS or protocol failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The remote end answered with a non-success status.
    #[error("rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The attempt exceeded its timeout.
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl SinkError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for credential problems the operator has to fix.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

/// A delivery target for the classified report.
///
/// Implement this for additional targets; the orchestrator treats every
/// sink identically.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs and run summaries.
    fn name(&self) -> &str;

    /// Deliver the batch.
    async fn publish(&self, run: &RunReport) -> Result<SinkOutcome, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_messages() {
        let err = SinkError::Rejected {
            status: 403,
            body: "Forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "rejected with HTTP 403: Forbidden");
        assert!(!err.is_authentication());

        let err = SinkError::Authentication {
            message: "535 5.7.8".to_string(),
        };
        assert!(err.is_authentication());
    }
}
