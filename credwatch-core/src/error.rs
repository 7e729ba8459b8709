//! Top-level error types for credwatch.
//!
//! Only errors that abort a run live here. Sink failures are not part of
//! this type: they are recorded per sink and the run carries on.

use thiserror::Error;

use crate::config::ConfigError;
use crate::directory::FetchError;
use crate::orchestrator::RunState;
use crate::token::TokenError;

/// A fatal error that moves a run to [`RunState::Aborted`].
#[derive(Debug, Error)]
pub enum CredwatchError {
    /// Settings could not be loaded or are malformed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Identity fields required to build a credential are missing.
    #[error("missing identity settings: {}", missing.join(", "))]
    Credential { missing: Vec<&'static str> },

    /// The credential could not be constructed from the identity fields.
    #[error("credential error: {0}")]
    Token(#[from] TokenError),

    /// Directory enumeration failed; no partial result is kept.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// The run was cancelled before it finished.
    #[error("run cancelled while {during}")]
    Cancelled { during: RunState },
}

impl CredwatchError {
    /// The state from which the run moved to `Aborted`.
    pub fn stage(&self) -> RunState {
        match self {
            Self::Config(_) | Self::Credential { .. } => RunState::Init,
            Self::Token(_) => RunState::CredentialReady,
            Self::Fetch(_) => RunState::Fetched,
            Self::Cancelled { during } => *during,
        }
    }
}
