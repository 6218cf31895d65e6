use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::persist::{read_json, write_json};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsRecord {
    pub processed_total: u64,
    pub processed_success: u64,
    pub processed_error: u64,
}

impl MetricsRecord {
    pub fn record_success(&mut self) {
        self.processed_total = self.processed_total.saturating_add(1);
        self.processed_success = self.processed_success.saturating_add(1);
    }

    pub fn record_error(&mut self) {
        self.processed_total = self.processed_total.saturating_add(1);
        self.processed_error = self.processed_error.saturating_add(1);
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed_total == 0 {
            0.0
        } else {
            (self.processed_success as f64 / self.processed_total as f64) * 100.0
        }
    }
}

/// Cumulative processing counters kept in a JSON file.
#[derive(Debug, Clone)]
pub struct MetricsStore {
    path: PathBuf,
}

impl MetricsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current counters; a missing or corrupt file reads as zero.
    pub fn load(&self) -> MetricsRecord {
        read_json(&self.path).unwrap_or_default()
    }

    /// Read-modify-write of one processed item.
    pub fn record(&self, success: bool) -> Result<MetricsRecord, PersistError> {
        let mut metrics = self.load();
        if success {
            metrics.record_success();
        } else {
            metrics.record_error();
        }
        write_json(&self.path, &metrics)?;
        Ok(metrics)
    }
}
