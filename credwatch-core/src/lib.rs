//! # Credwatch Core
//!
//! Core library for monitoring client-secret expiry of application
//! registrations.
//!
//! This crate provides:
//! - Domain types for credential records and days-to-expiry
//! - A paginated directory fetcher behind the [`ApplicationSource`] trait
//! - Threshold selection, urgency classes and plain/HTML report rendering
//! - Pluggable delivery through the [`Sink`] trait (signed log ingestion
//!   and, optionally, SMTP mail)
//! - The [`Pipeline`] state machine that ties a run together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use credwatch_core::{Pipeline, Settings};
//!
//! async fn check(settings: &Settings) -> Result<(), credwatch_core::CredwatchError> {
//!     let pipeline = Pipeline::from_settings(settings)?;
//!     let outcome = pipeline.run(chrono::Utc::now()).await;
//!     if let Some(report) = outcome.fallback_report {
//!         println!("{}", report);
//!     }
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod directory;
pub mod error;
pub mod expiry;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod secret;
pub mod sink;
pub mod snapshot;
pub mod token;

#[cfg(feature = "oauth")]
pub mod oauth;

// Re-export commonly used types at crate root
pub use model::{CredentialRecord, DaysToExpire, recompute};

pub use secret::Secret;

pub use token::{AccessToken, StaticTokenSource, TokenError, TokenSource};

pub use directory::{ApplicationSource, DirectoryClient, FetchError, fetch_all_records};

pub use classify::{UrgencyClass, select, sort_by_urgency, urgency_class};

pub use report::{Report, render, render_in};

pub use sink::{LogIngestionSink, RunReport, Sink, SinkError, SinkOutcome};

#[cfg(feature = "email")]
pub use sink::EmailSink;

pub use snapshot::{SnapshotError, read_snapshot, write_snapshot};

pub use config::{ConfigError, Settings};

pub use orchestrator::{Pipeline, RunOutcome, RunState, SinkReport};

pub use error::CredwatchError;

#[cfg(feature = "oauth")]
pub use oauth::ClientCredentialsSource;
