//! Run settings.
//!
//! Settings are read from a TOML file (by default
//! `~/.config/credwatch/config.toml` on Linux). Secrets may instead come
//! from the environment: `CREDWATCH_CLIENT_SECRET`, `CREDWATCH_SHARED_KEY`
//! and `CREDWATCH_SMTP_PASSWORD` override whatever the file contains.
//!
//! # Example
//!
//! ```toml
//! threshold_days = 30
//!
//! [identity]
//! tenant_id = "contoso.onmicrosoft.com"
//! client_id = "00000000-0000-0000-0000-000000000000"
//!
//! [notification_sink]
//! smtp_host = "smtp.example.com"
//! sender = "alerts@example.com"
//! recipients = ["ops@example.com"]
//!
//! # Every run with a non-empty selection writes a JSON snapshot. Without
//! # this section it goes to the platform data directory, e.g.
//! # ~/.local/share/credwatch/snapshots on Linux.
//! [snapshot]
//! enabled = true
//! # dir = "/var/lib/credwatch/snapshots"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::classify::DEFAULT_THRESHOLD_DAYS;
use crate::directory::{DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE};
use crate::error::CredwatchError;
use crate::report::REPORT_TITLE;
use crate::secret::Secret;
use crate::sink::ingestion::DEFAULT_LOG_TYPE;

/// Environment variable overriding `identity.client_secret`.
pub const ENV_CLIENT_SECRET: &str = "CREDWATCH_CLIENT_SECRET";
/// Environment variable overriding `ingestion_sink.shared_key`.
pub const ENV_SHARED_KEY: &str = "CREDWATCH_SHARED_KEY";
/// Environment variable overriding `notification_sink.password`.
pub const ENV_SMTP_PASSWORD: &str = "CREDWATCH_SMTP_PASSWORD";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SMTP_PORT: u16 = 587;
/// Public-cloud token authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Error type for loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file does not exist.
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The settings file exists but could not be read.
    #[error("failed to read config from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("failed to parse config: {message}")]
    Parse { message: String },

    /// A value is present but unusable.
    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    /// No platform configuration directory could be determined.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

/// Complete settings for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Secrets expiring in this many days or fewer are reported.
    #[serde(default = "default_threshold_days")]
    pub threshold_days: i64,

    /// Timeout for each outbound call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub identity: IdentitySettings,

    #[serde(default)]
    pub directory: DirectorySettings,

    #[serde(default)]
    pub ingestion_sink: Option<IngestionSettings>,

    #[serde(default)]
    pub notification_sink: Option<NotificationSettings>,

    #[serde(default)]
    pub snapshot: SnapshotSettings,
}

/// Identity of the monitoring application itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    #[serde(default)]
    pub tenant_id: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: Option<Secret>,

    /// Token authority; differs per sovereign cloud.
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            authority_host: default_authority_host(),
        }
    }
}

/// Directory API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
        }
    }
}

/// Log-ingestion sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Workspace id; also the host prefix of the default endpoint.
    #[serde(default)]
    pub endpoint_id: String,

    /// Base64-encoded shared key.
    #[serde(default)]
    pub shared_key: Option<Secret>,

    #[serde(default = "default_log_type")]
    pub log_type: String,

    /// Replaces `https://{endpoint_id}.ods.opinsights.azure.com`.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Mail notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Envelope sender; also the SMTP login name.
    #[serde(default)]
    pub sender: String,

    #[serde(default)]
    pub password: Option<Secret>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub recipients: Vec<String>,

    #[serde(default = "default_subject")]
    pub subject: String,
}

/// Local JSON audit snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to the platform data directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = project_dirs().ok_or(ConfigError::ConfigDirUnavailable)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let mut settings = Self::from_toml_str(&contents)?;
        settings.apply_env(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Replace secrets with values from `lookup` where it has one.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty()).map(Secret::new);

        if let Some(secret) = non_empty(ENV_CLIENT_SECRET) {
            self.identity.client_secret = Some(secret);
        }
        if let Some(key) = non_empty(ENV_SHARED_KEY) {
            if let Some(sink) = self.ingestion_sink.as_mut() {
                sink.shared_key = Some(key);
            }
        }
        if let Some(password) = non_empty(ENV_SMTP_PASSWORD) {
            if let Some(sink) = self.notification_sink.as_mut() {
                sink.password = Some(password);
            }
        }
    }

    /// Check values that would otherwise fail later in confusing ways.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.directory.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "directory.page_size",
                message: "must be greater than zero".to_string(),
            });
        }
        url::Url::parse(&self.directory.base_url).map_err(|e| ConfigError::Invalid {
            field: "directory.base_url",
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Require tenant id, client id and client secret.
    pub fn validate_identity(&self) -> Result<(), CredwatchError> {
        let mut missing = Vec::new();
        if self.identity.tenant_id.trim().is_empty() {
            missing.push("identity.tenant_id");
        }
        if self.identity.client_id.trim().is_empty() {
            missing.push("identity.client_id");
        }
        if self.identity.client_secret.as_ref().is_none_or(Secret::is_blank) {
            missing.push("identity.client_secret");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CredwatchError::Credential { missing })
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Where snapshots go, or `None` when disabled.
    ///
    /// Enabled by default; without `snapshot.dir` this is `snapshots/`
    /// under the platform data directory.
    pub fn snapshot_dir(&self) -> Option<PathBuf> {
        if !self.snapshot.enabled {
            return None;
        }
        self.snapshot
            .dir
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().join("snapshots")))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "credwatch", "credwatch")
}

/// Accept either `recipients = "a@x"` or `recipients = ["a@x", "b@x"]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

fn default_threshold_days() -> i64 {
    DEFAULT_THRESHOLD_DAYS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_log_type() -> String {
    DEFAULT_LOG_TYPE.to_string()
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_subject() -> String {
    REPORT_TITLE.to_string()
}

fn default_true() -> bool {
    true
}
