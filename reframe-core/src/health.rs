use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::persist::{read_json, write_json};

/// Observational record of the last queue fetch. Never read back by the
/// worker itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub last_fetch_timestamp: String,
    pub remaining_item_count: usize,
}

impl HealthSnapshot {
    pub fn at(timestamp: DateTime<Utc>, remaining_item_count: usize) -> Self {
        Self {
            last_fetch_timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            remaining_item_count,
        }
    }

    pub fn now(remaining_item_count: usize) -> Self {
        Self::at(Utc::now(), remaining_item_count)
    }
}

#[derive(Debug, Clone)]
pub struct HealthReporter {
    path: PathBuf,
}

impl HealthReporter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, snapshot: &HealthSnapshot) -> Result<(), PersistError> {
        write_json(&self.path, snapshot)
    }

    pub fn read(&self) -> Option<HealthSnapshot> {
        read_json(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn snapshot_uses_utc_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let snapshot = HealthSnapshot::at(ts, 3);
        assert_eq!(snapshot.last_fetch_timestamp, "2024-05-01T12:30:00.000000Z");
    }

    #[test]
    fn write_overwrites_previous_snapshot() {
        let dir = tempdir().unwrap();
        let reporter = HealthReporter::new(dir.path().join("logs/health.json"));
        reporter.write(&HealthSnapshot::now(5)).unwrap();
        reporter.write(&HealthSnapshot::now(4)).unwrap();
        assert_eq!(reporter.read().unwrap().remaining_item_count, 4);
    }
}
