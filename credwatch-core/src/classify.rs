//! Expiry selection and urgency classification.

use std::fmt;

use crate::model::CredentialRecord;

/// Default selection threshold in days.
pub const DEFAULT_THRESHOLD_DAYS: i64 = 30;

/// Upper bound (inclusive) of the `warning` urgency band.
pub const WARNING_WINDOW_DAYS: i64 = 30;

/// Presentation label derived from the numeric day count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrgencyClass {
    /// Already past its end date.
    Expired,

    /// Expires within [`WARNING_WINDOW_DAYS`].
    Warning,

    /// Neither, or no numeric day count.
    None,
}

impl UrgencyClass {
    /// CSS class name; empty for [`UrgencyClass::None`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Warning => "warning",
            Self::None => "",
        }
    }
}

impl fmt::Display for UrgencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a record by its numeric `days_to_expire`.
pub fn urgency_class(record: &CredentialRecord) -> UrgencyClass {
    match record.days() {
        Some(days) if days < 0 => UrgencyClass::Expired,
        Some(days) if days <= WARNING_WINDOW_DAYS => UrgencyClass::Warning,
        _ => UrgencyClass::None,
    }
}

/// Keep records with a numeric day count at or below `threshold_days`.
///
/// Already-expired secrets (negative counts) are included. Relative order
/// is preserved.
pub fn select(records: &[CredentialRecord], threshold_days: i64) -> Vec<CredentialRecord> {
    records
        .iter()
        .filter(|record| record.days().is_some_and(|days| days <= threshold_days))
        .cloned()
        .collect()
}

/// Most urgent first; records without a numeric day count go last.
///
/// The sort is stable, so ties keep their input order.
pub fn sort_by_urgency(records: &[CredentialRecord]) -> Vec<CredentialRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|record| record.days().unwrap_or(i64::MAX));
    sorted
}
