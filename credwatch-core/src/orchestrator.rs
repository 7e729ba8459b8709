//! The run state machine.
//!
//! A run moves through
//! `Init → CredentialReady → Fetched → Classified → Reported → Done`,
//! or ends in `Aborted` when settings, the credential or the directory
//! fetch fail. Sink failures never abort a run; instead the plain report
//! is handed back as a fallback so it is never silently dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "oauth")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use credwatch_core::{Pipeline, RunState, Settings};
//!
//! let settings = Settings::load(&Settings::default_path()?)?;
//! let pipeline = Pipeline::from_settings(&settings)?;
//!
//! let outcome = pipeline.run(chrono::Utc::now()).await;
//! assert_eq!(outcome.final_state, RunState::Done);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classify::{DEFAULT_THRESHOLD_DAYS, select};
use crate::directory::{ApplicationPage, ApplicationSource, FetchError, fetch_all_records};
use crate::error::CredwatchError;
use crate::model::CredentialRecord;
use crate::report::render;
use crate::sink::{RunReport, Sink, SinkError, SinkOutcome};
use crate::snapshot::write_snapshot;

#[cfg(feature = "oauth")]
use crate::config::Settings;
#[cfg(feature = "oauth")]
use crate::directory::DirectoryClient;
#[cfg(feature = "oauth")]
use crate::oauth::{ClientCredentialsSource, default_scope};

/// States of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Init,
    CredentialReady,
    Fetched,
    Classified,
    Reported,
    Done,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CredentialReady => "credential-ready",
            Self::Fetched => "fetched",
            Self::Classified => "classified",
            Self::Reported => "reported",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    /// True for `Done` and `Aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one sink did during a run.
#[derive(Debug, Clone)]
pub struct SinkReport {
    pub name: String,
    pub result: Result<SinkOutcome, SinkError>,
}

impl SinkReport {
    pub fn new(name: impl Into<String>, result: Result<SinkOutcome, SinkError>) -> Self {
        Self {
            name: name.into(),
            result,
        }
    }

    pub fn delivered(&self) -> bool {
        matches!(self.result, Ok(SinkOutcome::Delivered { .. }))
    }

    pub fn failed(&self) -> bool {
        self.result.is_err()
    }
}

/// Summary of a finished run.
#[derive(Debug)]
pub struct RunOutcome {
    /// `Done` or `Aborted`.
    pub final_state: RunState,

    /// Records produced by the fetch, before selection.
    pub records_seen: usize,

    /// Records at or under the threshold.
    pub selected: Vec<CredentialRecord>,

    /// One entry per configured sink, in configuration order.
    pub sink_results: Vec<SinkReport>,

    /// Plain report to show directly when no sink delivered or any sink failed.
    pub fallback_report: Option<String>,

    /// Where the snapshot was written, if it was.
    pub snapshot_path: Option<PathBuf>,

    /// Why the run aborted.
    pub error: Option<CredwatchError>,
}

impl RunOutcome {
    /// An outcome for a run that never got past `Init` or was cut short.
    pub fn aborted(error: CredwatchError) -> Self {
        Self {
            final_state: RunState::Aborted,
            records_seen: 0,
            selected: Vec::new(),
            sink_results: Vec::new(),
            fallback_report: None,
            snapshot_path: None,
            error: Some(error),
        }
    }

    fn done(records_seen: usize) -> Self {
        Self {
            final_state: RunState::Done,
            records_seen,
            selected: Vec::new(),
            sink_results: Vec::new(),
            fallback_report: None,
            snapshot_path: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_state == RunState::Done
    }
}

/// One configured run: where applications come from and where reports go.
///
/// # Type Parameters
///
/// * `S` - Application source, usually a [`DirectoryClient`]
pub struct Pipeline<S: ApplicationSource> {
    source: S,
    sinks: Vec<Arc<dyn Sink>>,
    unavailable: Vec<SinkReport>,
    threshold_days: i64,
    timeout: Duration,
    snapshot_dir: Option<PathBuf>,
    dry_run: bool,
}

impl<S: ApplicationSource> Pipeline<S> {
    /// Create a pipeline with no sinks, the default threshold and a 30s timeout.
    pub fn new(source: S) -> Self {
        Self {
            source,
            sinks: Vec::new(),
            unavailable: Vec::new(),
            threshold_days: DEFAULT_THRESHOLD_DAYS,
            timeout: Duration::from_secs(30),
            snapshot_dir: None,
            dry_run: false,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Record a sink that could not be used (disabled or misconfigured).
    ///
    /// It shows up in [`RunOutcome::sink_results`] without being called.
    pub fn with_unavailable_sink(
        mut self,
        name: impl Into<String>,
        result: Result<SinkOutcome, SinkError>,
    ) -> Self {
        self.unavailable.push(SinkReport::new(name, result));
        self
    }

    pub fn with_threshold(mut self, threshold_days: i64) -> Self {
        self.threshold_days = threshold_days;
        self
    }

    /// Bound each directory page, and each sink attempt, by `timeout`.
    ///
    /// Enumeration as a whole is unbounded; use [`run_until`](Self::run_until)
    /// to stop a run early.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_snapshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.snapshot_dir = dir;
        self
    }

    /// Fetch, classify and render, but call no sink.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn threshold_days(&self) -> i64 {
        self.threshold_days
    }

    /// Run to completion using `now` for every day calculation.
    pub async fn run(&self, now: DateTime<Utc>) -> RunOutcome {
        let state = Mutex::new(RunState::CredentialReady);
        self.drive(now, &state).await
    }

    /// Like [`run`](Self::run), but give up as soon as `shutdown` resolves.
    ///
    /// Nothing after the current state is attempted once cancelled; a fetch
    /// in flight is dropped without emitting any partial result.
    pub async fn run_until<F>(&self, now: DateTime<Utc>, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        let state = Mutex::new(RunState::CredentialReady);

        tokio::select! {
            outcome = self.drive(now, &state) => outcome,
            _ = shutdown => {
                let during = *state.lock();
                warn!(state = %during, "Run cancelled");
                RunOutcome::aborted(CredwatchError::Cancelled { during })
            }
        }
    }

    async fn drive(&self, now: DateTime<Utc>, state: &Mutex<RunState>) -> RunOutcome {
        let transition = |next: RunState| {
            let mut current = state.lock();
            debug!(from = %*current, to = %next, "State transition");
            *current = next;
        };

        info!(state = %RunState::CredentialReady, threshold = self.threshold_days, "Starting run");

        let bounded = PageDeadline {
            source: &self.source,
            timeout: self.timeout,
        };
        let records = match fetch_all_records(&bounded, now).await {
            Ok(records) => records,
            Err(e) => return self.abort(state, e.into()),
        };
        transition(RunState::Fetched);

        let records_seen = records.len();
        if records.is_empty() {
            info!("Directory returned no applications");
            transition(RunState::Done);
            return RunOutcome::done(0);
        }

        let selected = select(&records, self.threshold_days);
        transition(RunState::Classified);
        info!(records = records_seen, selected = selected.len(), "Classified credentials");

        if selected.is_empty() {
            info!(threshold = self.threshold_days, "No secrets expiring within threshold");
            transition(RunState::Done);
            return RunOutcome::done(records_seen);
        }

        let snapshot_path = self.snapshot_dir.as_ref().and_then(|dir| {
            match write_snapshot(dir, &selected, now) {
                Ok(path) => {
                    info!(path = %path.display(), "Wrote snapshot");
                    Some(path)
                }
                Err(e) => {
                    warn!(error = %e, "Could not write snapshot");
                    None
                }
            }
        });

        let run = Arc::new(RunReport {
            report: render(&selected, now),
            records: selected,
            generated_at: now,
        });

        let mut sink_results = self.publish_all(&run).await;
        sink_results.extend(self.unavailable.iter().cloned());
        transition(RunState::Reported);

        let needs_fallback = sink_results.iter().any(SinkReport::failed)
            || !sink_results.iter().any(SinkReport::delivered);
        let fallback_report = needs_fallback.then(|| {
            warn!("Report was not delivered everywhere; showing it here:\n{}", run.report.plain);
            run.report.plain.clone()
        });

        transition(RunState::Done);
        info!(
            selected = run.records.len(),
            delivered = sink_results.iter().filter(|r| r.delivered()).count(),
            failed = sink_results.iter().filter(|r| r.failed()).count(),
            "Run complete"
        );

        RunOutcome {
            final_state: RunState::Done,
            records_seen,
            selected: run.records.clone(),
            sink_results,
            fallback_report,
            snapshot_path,
            error: None,
        }
    }

    /// Publish to every sink at once and collect results in sink order.
    async fn publish_all(&self, run: &Arc<RunReport>) -> Vec<SinkReport> {
        if self.dry_run {
            return self
                .sinks
                .iter()
                .map(|sink| SinkReport::new(sink.name(), Ok(SinkOutcome::skipped("dry run"))))
                .collect();
        }

        let mut tasks = JoinSet::new();
        for (index, sink) in self.sinks.iter().enumerate() {
            let sink = Arc::clone(sink);
            let run = Arc::clone(run);
            let timeout = self.timeout;

            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, sink.publish(&run)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout {
                        seconds: timeout.as_secs(),
                    }),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<SinkOutcome, SinkError>>> = vec![None; self.sinks.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(error = %e, "Sink task failed to complete"),
            }
        }

        self.sinks
            .iter()
            .zip(results)
            .map(|(sink, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(SinkError::Transport {
                        message: "sink task did not complete".to_string(),
                    })
                });
                log_sink_result(sink.name(), &result);
                SinkReport::new(sink.name(), result)
            })
            .collect()
    }

    fn abort(&self, state: &Mutex<RunState>, error: CredwatchError) -> RunOutcome {
        *state.lock() = RunState::Aborted;
        error!(stage = %error.stage(), error = %error, "Run aborted");
        RunOutcome::aborted(error)
    }
}

/// Applies the run timeout to every page request of the wrapped source.
struct PageDeadline<'a, S> {
    source: &'a S,
    timeout: Duration,
}

#[async_trait]
impl<'a, S: ApplicationSource> ApplicationSource for PageDeadline<'a, S> {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<ApplicationPage, FetchError> {
        match tokio::time::timeout(self.timeout, self.source.fetch_page(cursor)).await {
            Ok(page) => page,
            Err(_) => Err(FetchError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

fn log_sink_result(name: &str, result: &Result<SinkOutcome, SinkError>) {
    match result {
        Ok(SinkOutcome::Delivered { detail }) => info!(sink = name, %detail, "Sink delivered"),
        Ok(SinkOutcome::Skipped { reason }) => info!(sink = name, %reason, "Sink skipped"),
        Err(e) if e.is_authentication() => {
            warn!(sink = name, error = %e, "Sink rejected its credentials; check the configured password or key")
        }
        Err(e) => warn!(sink = name, error = %e, "Sink failed"),
    }
}

#[cfg(feature = "oauth")]
impl Pipeline<DirectoryClient<ClientCredentialsSource>> {
    /// Build the production pipeline: `Init → CredentialReady`.
    ///
    /// Fails when settings are invalid or identity fields are missing. A
    /// sink that cannot be constructed does not fail the pipeline; it is
    /// reported as a failed sink when the run completes.
    pub fn from_settings(settings: &Settings) -> Result<Self, CredwatchError> {
        settings.validate()?;
        settings.validate_identity()?;

        let identity = &settings.identity;
        let client_secret = identity
            .client_secret
            .as_ref()
            .ok_or_else(|| CredwatchError::Credential {
                missing: vec!["identity.client_secret"],
            })?;

        let timeout = settings.timeout();
        let scope = default_scope(&settings.directory.base_url)?;
        let tokens = ClientCredentialsSource::new(
            &identity.authority_host,
            &identity.tenant_id,
            &identity.client_id,
            client_secret,
            scope,
        )?
        .with_timeout(timeout);

        let client = DirectoryClient::new(settings.directory.base_url.clone(), tokens)
            .with_timeout(timeout)
            .with_page_size(settings.directory.page_size);

        let mut pipeline = Pipeline::new(client)
            .with_threshold(settings.threshold_days)
            .with_timeout(timeout)
            .with_snapshot_dir(settings.snapshot_dir());

        pipeline = match &settings.ingestion_sink {
            Some(ingestion) if ingestion.enabled => {
                match crate::sink::LogIngestionSink::new(ingestion) {
                    Ok(sink) => pipeline.with_sink(Arc::new(sink.with_timeout(timeout))),
                    Err(e) => {
                        warn!(sink = "log-ingestion", error = %e, "Sink unavailable");
                        pipeline.with_unavailable_sink("log-ingestion", Err(e))
                    }
                }
            }
            Some(_) => pipeline.with_unavailable_sink("log-ingestion", Ok(SinkOutcome::skipped("disabled"))),
            None => pipeline,
        };

        pipeline = match &settings.notification_sink {
            Some(notification) if notification.enabled => email_sink(pipeline, notification, timeout),
            Some(_) => pipeline.with_unavailable_sink("email", Ok(SinkOutcome::skipped("disabled"))),
            None => pipeline,
        };

        info!(state = %RunState::CredentialReady, "Credential ready");
        Ok(pipeline)
    }
}

#[cfg(all(feature = "oauth", feature = "email"))]
fn email_sink<S: ApplicationSource>(
    pipeline: Pipeline<S>,
    settings: &crate::config::NotificationSettings,
    timeout: Duration,
) -> Pipeline<S> {
    match crate::sink::EmailSink::new(settings) {
        Ok(sink) => pipeline.with_sink(Arc::new(sink.with_timeout(timeout))),
        Err(e) => {
            warn!(sink = "email", error = %e, "Sink unavailable");
            pipeline.with_unavailable_sink("email", Err(e))
        }
    }
}

#[cfg(all(feature = "oauth", not(feature = "email")))]
fn email_sink<S: ApplicationSource>(
    pipeline: Pipeline<S>,
    _settings: &crate::config::NotificationSettings,
    _timeout: Duration,
) -> Pipeline<S> {
    pipeline.with_unavailable_sink(
        "email",
        Err(SinkError::config("built without the `email` feature")),
    )
}
