use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::health::{HealthReporter, HealthSnapshot};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to read queue file {path}: {source}")]
    Read { source: csv::Error, path: PathBuf },
}

pub type QueueResult<T> = Result<T, QueueError>;

/// One record from the work source, keyed by the header names in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkItem {
    fields: Vec<(String, String)>,
    extra: Vec<String>,
}

impl WorkItem {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            extra: Vec::new(),
        }
    }

    /// Values found past the last header column.
    pub fn extra(&self) -> &[String] {
        &self.extra
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == field)
            .map(|(_, value)| value.as_str())
    }

    /// Correlation id used in logs, when the record carries a non-empty `id`.
    pub fn id(&self) -> Option<&str> {
        self.get("id").filter(|value| !value.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "item id={id}"),
            None => f.write_str("item"),
        }
    }
}

impl Serialize for WorkItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Source of work items for the cycle loop.
pub trait WorkSource {
    /// Prepares the queue and reports whether items are pending. Only the
    /// first call does any loading.
    fn initialize(&mut self) -> bool;
    /// Removes and returns the head of the queue.
    fn fetch_next(&mut self) -> Option<WorkItem>;
}

/// Reads all records of a headed CSV file. A missing file is an empty queue.
///
/// Rows need not match the header width: a short row lacks the trailing
/// fields and a long row keeps its surplus values in [`WorkItem::extra`].
pub fn load_records(path: &Path) -> QueueResult<Vec<WorkItem>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|source| read_error(source, path))?;
    let headers = reader
        .headers()
        .map_err(|source| read_error(source, path))?
        .clone();

    let mut items = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| read_error(source, path))?;
        if record.len() != headers.len() {
            debug!(
                line = record.position().map(|pos| pos.line()).unwrap_or_default(),
                expected = headers.len(),
                found = record.len(),
                "ragged queue row"
            );
        }
        let mut item = WorkItem::from_pairs(
            headers
                .iter()
                .zip(record.iter())
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        item.extra = record
            .iter()
            .skip(headers.len())
            .map(str::to_string)
            .collect();
        items.push(item);
    }
    Ok(items)
}

fn read_error(source: csv::Error, path: &Path) -> QueueError {
    QueueError::Read {
        source,
        path: path.to_path_buf(),
    }
}

/// In-memory FIFO snapshot of a CSV work file, loaded once per process.
#[derive(Debug)]
pub struct CsvWorkQueue {
    path: PathBuf,
    health: HealthReporter,
    items: VecDeque<WorkItem>,
    loaded: bool,
}

impl CsvWorkQueue {
    pub fn new<P: AsRef<Path>>(path: P, health: HealthReporter) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            health,
            items: VecDeque::new(),
            loaded: false,
        }
    }

    pub fn from_config(config: &crate::RobotConfig) -> Self {
        Self::new(config.queue_path(), HealthReporter::new(config.health_path()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

impl WorkSource for CsvWorkQueue {
    fn initialize(&mut self) -> bool {
        if self.loaded {
            return !self.items.is_empty();
        }
        self.items = match load_records(&self.path) {
            Ok(items) => {
                info!(path = %self.path.display(), items = items.len(), "work queue loaded");
                items.into()
            }
            Err(err) => {
                error!(error = %err, "work queue unreadable, treating as empty");
                VecDeque::new()
            }
        };
        self.loaded = true;
        !self.items.is_empty()
    }

    fn fetch_next(&mut self) -> Option<WorkItem> {
        let item = self.items.pop_front()?;
        let snapshot = HealthSnapshot::now(self.items.len());
        if let Err(err) = self.health.write(&snapshot) {
            warn!(path = %self.health.path().display(), error = %err, "failed to write health snapshot");
        }
        Some(item)
    }
}
