//! Local JSON snapshots of the selected records.
//!
//! Each run writes `expiring_apps_{YYYYmmdd_HHMMSS}.json` (local time) to
//! the snapshot directory. A snapshot can be read back and rendered again
//! without touching the directory service.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use thiserror::Error;
use tracing::debug;

use crate::model::CredentialRecord;

/// Error type for snapshot I/O.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot {} is not a valid record list: {message}", path.display())]
    Format { path: PathBuf, message: String },
}

/// File name for a snapshot taken at `now`.
pub fn snapshot_file_name(now: DateTime<Utc>) -> String {
    format!(
        "expiring_apps_{}.json",
        now.with_timezone(&Local).format("%Y%m%d_%H%M%S")
    )
}

/// Write `records` as pretty JSON under `dir`, creating it if needed.
pub fn write_snapshot(
    dir: &Path,
    records: &[CredentialRecord],
    now: DateTime<Utc>,
) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(dir).map_err(|source| SnapshotError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(snapshot_file_name(now));
    let json = serde_json::to_string_pretty(records).map_err(|e| SnapshotError::Format {
        path: path.clone(),
        message: e.to_string(),
    })?;

    fs::write(&path, json).map_err(|source| SnapshotError::Io {
        path: path.clone(),
        source,
    })?;

    debug!(path = %path.display(), records = records.len(), "Wrote snapshot");
    Ok(path)
}

/// Read a snapshot written by [`write_snapshot`].
pub fn read_snapshot(path: &Path) -> Result<Vec<CredentialRecord>, SnapshotError> {
    let contents = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&contents).map_err(|e| SnapshotError::Format {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DaysToExpire;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> Vec<CredentialRecord> {
        let created = Utc.with_ymd_and_hms(2023, 5, 1, 8, 0, 0).unwrap();
        vec![
            CredentialRecord {
                display_name: "billing-api".to_string(),
                app_id: "app-1".to_string(),
                created_time: Some(created),
                has_secret: true,
                end_date: Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()),
                days_to_expire: DaysToExpire::Days(9),
            },
            CredentialRecord {
                display_name: "legacy".to_string(),
                app_id: "app-2".to_string(),
                created_time: None,
                has_secret: true,
                end_date: Some(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap()),
                days_to_expire: DaysToExpire::Days(-31),
            },
        ]
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("snapshots");
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let path = write_snapshot(&dir, &sample(), now).unwrap();
        assert!(path.starts_with(&dir));
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            snapshot_file_name(now)
        );

        let records = read_snapshot(&path).unwrap();
        assert_eq!(records, sample());
    }

    #[test]
    fn test_file_name_shape() {
        let name = snapshot_file_name(Utc::now());
        assert!(name.starts_with("expiring_apps_"));
        assert!(name.ends_with(".json"));
        // expiring_apps_ + YYYYmmdd_HHMMSS + .json
        assert_eq!(name.len(), "expiring_apps_".len() + 15 + ".json".len());
    }

    #[test]
    fn test_read_invalid_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            read_snapshot(&path),
            Err(SnapshotError::Format { .. })
        ));
        assert!(matches!(
            read_snapshot(&temp.path().join("missing.json")),
            Err(SnapshotError::Io { .. })
        ));
    }
}
