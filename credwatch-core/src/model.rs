//! Domain model types for credwatch.
//!
//! This module defines the record produced for every client secret found
//! in the directory:
//! - [`CredentialRecord`] - One row per (application, credential) pair
//! - [`DaysToExpire`] - Whole days remaining, or a sentinel when unknown

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::expiry::days_to_expire;

/// Placeholder used when the provider omits a display name or app id.
pub const NOT_AVAILABLE: &str = "N/A";

/// Placeholder used when a timestamp cannot be determined.
pub const UNKNOWN: &str = "Unknown";

/// Days remaining until a credential expires.
///
/// Serialized as a bare integer for [`DaysToExpire::Days`] and as the
/// strings `"N/A"` / `"Unknown"` for the sentinels, so downstream log
/// queries can filter on the numeric column directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaysToExpire {
    /// Whole days until expiry; negative once the credential has expired.
    Days(i64),

    /// The application has no credential, so there is nothing to expire.
    NotApplicable,

    /// The credential exists but its end date could not be determined.
    Unknown,
}

impl DaysToExpire {
    /// The numeric value, if there is one.
    pub fn as_days(&self) -> Option<i64> {
        match self {
            Self::Days(days) => Some(*days),
            Self::NotApplicable | Self::Unknown => None,
        }
    }
}

impl fmt::Display for DaysToExpire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(days) => write!(f, "{} days", days),
            Self::NotApplicable => f.write_str(NOT_AVAILABLE),
            Self::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl Serialize for DaysToExpire {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Days(days) => serializer.serialize_i64(*days),
            Self::NotApplicable => serializer.serialize_str(NOT_AVAILABLE),
            Self::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

impl<'de> Deserialize<'de> for DaysToExpire {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DaysVisitor;

        impl Visitor<'_> for DaysVisitor {
            type Value = DaysToExpire;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer or one of \"N/A\", \"Unknown\"")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(DaysToExpire::Days(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v)
                    .map(DaysToExpire::Days)
                    .map_err(|_| E::custom("days_to_expire out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v {
                    NOT_AVAILABLE => Ok(DaysToExpire::NotApplicable),
                    UNKNOWN => Ok(DaysToExpire::Unknown),
                    other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }
        }

        deserializer.deserialize_any(DaysVisitor)
    }
}

/// One client secret of one application registration.
///
/// Applications without any client secret produce a single sentinel
/// record with `has_secret == false` and [`DaysToExpire::NotApplicable`].
/// Records are never mutated after construction; each pipeline stage
/// builds a new collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Human label of the application.
    pub display_name: String,

    /// Application (client) id; repeated across an application's rows.
    pub app_id: String,

    /// When the application registration was created.
    pub created_time: Option<DateTime<Utc>>,

    /// Whether this row describes an actual secret.
    pub has_secret: bool,

    /// When the secret stops being valid.
    pub end_date: Option<DateTime<Utc>>,

    /// Days remaining, computed once against the run's "now".
    pub days_to_expire: DaysToExpire,
}

impl CredentialRecord {
    /// Sentinel row for an application that holds no client secret.
    pub fn without_secret(
        display_name: impl Into<String>,
        app_id: impl Into<String>,
        created_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            app_id: app_id.into(),
            created_time,
            has_secret: false,
            end_date: None,
            days_to_expire: DaysToExpire::NotApplicable,
        }
    }

    /// Numeric days remaining, if known.
    pub fn days(&self) -> Option<i64> {
        self.days_to_expire.as_days()
    }

    /// Label used in the "Client Secret" report column.
    pub fn secret_label(&self) -> &'static str {
        if self.has_secret { "Password" } else { "None" }
    }

    /// Copy of this record with `days_to_expire` counted against `now`.
    ///
    /// Sentinel rows and secrets without an end date are returned unchanged.
    pub fn recomputed(&self, now: DateTime<Utc>) -> Self {
        let days = match self.end_date {
            Some(end) if self.has_secret => DaysToExpire::Days(days_to_expire(end, now)),
            _ => self.days_to_expire,
        };
        Self {
            days_to_expire: days,
            ..self.clone()
        }
    }
}

/// Recount every record's days against `now`, e.g. when re-rendering a
/// snapshot taken by an earlier run.
pub fn recompute(records: &[CredentialRecord], now: DateTime<Utc>) -> Vec<CredentialRecord> {
    records.iter().map(|record| record.recomputed(now)).collect()
}
