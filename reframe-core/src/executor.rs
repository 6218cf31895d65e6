use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::browser::{BrowserError, Session};
use crate::config::RobotConfig;
use crate::metrics::MetricsStore;
use crate::queue::WorkItem;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("invalid item: {0}")]
    InvalidItem(String),
    #[error("business rule failed: {0}")]
    Business(String),
    #[error("executor panicked: {0}")]
    Panicked(String),
}

/// Performs the unit of work for one fetched item.
#[async_trait(?Send)]
pub trait ItemExecutor {
    async fn execute(
        &self,
        item: &WorkItem,
        session: &dyn Session,
        config: &RobotConfig,
    ) -> Result<(), ExecutionError>;
}

/// Placeholder domain logic: logs the item and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExecutor;

#[async_trait(?Send)]
impl ItemExecutor for LoggingExecutor {
    async fn execute(
        &self,
        item: &WorkItem,
        session: &dyn Session,
        _config: &RobotConfig,
    ) -> Result<(), ExecutionError> {
        info!(item_id = item.id().unwrap_or("-"), session = %session.id(), "processing {item}");
        Ok(())
    }
}

/// Wraps an executor so that every invocation updates the persisted
/// metrics, including panics, which are reported as failures.
#[derive(Debug, Clone)]
pub struct MeteredExecutor<E> {
    inner: E,
    metrics: MetricsStore,
}

impl<E> MeteredExecutor<E> {
    pub fn new(inner: E, metrics: MetricsStore) -> Self {
        Self { inner, metrics }
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[async_trait(?Send)]
impl<E: ItemExecutor> ItemExecutor for MeteredExecutor<E> {
    async fn execute(
        &self,
        item: &WorkItem,
        session: &dyn Session,
        config: &RobotConfig,
    ) -> Result<(), ExecutionError> {
        let outcome = AssertUnwindSafe(self.inner.execute(item, session, config))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ExecutionError::Panicked(panic_message(payload))));

        match self.metrics.record(outcome.is_ok()) {
            Ok(metrics) => info!(
                item_id = item.id().unwrap_or("-"),
                total = metrics.processed_total,
                success = metrics.processed_success,
                errors = metrics.processed_error,
                success_rate = metrics.success_rate(),
                "metrics updated"
            ),
            Err(err) => {
                warn!(path = %self.metrics.path().display(), error = %err, "failed to persist metrics")
            }
        }

        match &outcome {
            Ok(()) => info!(item_id = item.id().unwrap_or("-"), "{item} processed successfully"),
            Err(err) => error!(item_id = item.id().unwrap_or("-"), error = %err, "{item} failed"),
        }
        outcome
    }
}
