use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::{AuthStatus, Authenticator, FormAuthenticator};
use crate::browser::{Session, SessionFactory};
use crate::config::RobotConfig;
use crate::evidence::EvidenceCapturer;
use crate::executor::{panic_message, ItemExecutor, LoggingExecutor, MeteredExecutor};
use crate::metrics::MetricsStore;
use crate::queue::{CsvWorkQueue, WorkSource};

/// Label given to evidence captured when an item fails.
pub const PROCESS_ITEM_EVIDENCE_LABEL: &str = "process_item";

/// What one iteration of the loop ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    NoSession,
    Unhealthy,
    LoginFailed,
    QueueEmpty,
    ItemProcessed,
    ItemFailed,
    /// A collaborator panicked outside item execution.
    Panicked,
}

impl CycleOutcome {
    /// Infrastructure trouble and lack of work idle the loop; item results
    /// never do.
    pub fn needs_backoff(&self) -> bool {
        !matches!(self, CycleOutcome::ItemProcessed | CycleOutcome::ItemFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::NoSession => "no_session",
            CycleOutcome::Unhealthy => "unhealthy",
            CycleOutcome::LoginFailed => "login_failed",
            CycleOutcome::QueueEmpty => "queue_empty",
            CycleOutcome::ItemProcessed => "item_processed",
            CycleOutcome::ItemFailed => "item_failed",
            CycleOutcome::Panicked => "panicked",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub cycles: u64,
    pub no_session: u64,
    pub unhealthy: u64,
    pub login_failed: u64,
    pub queue_empty: u64,
    pub item_processed: u64,
    pub item_failed: u64,
    pub panicked: u64,
    pub backoff_waits: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
}

impl CycleStats {
    fn record(&mut self, outcome: CycleOutcome) {
        self.cycles = self.cycles.saturating_add(1);
        let counter = match outcome {
            CycleOutcome::NoSession => &mut self.no_session,
            CycleOutcome::Unhealthy => &mut self.unhealthy,
            CycleOutcome::LoginFailed => &mut self.login_failed,
            CycleOutcome::QueueEmpty => &mut self.queue_empty,
            CycleOutcome::ItemProcessed => &mut self.item_processed,
            CycleOutcome::ItemFailed => &mut self.item_failed,
            CycleOutcome::Panicked => &mut self.panicked,
        };
        *counter = counter.saturating_add(1);
    }
}

/// Fixed idle period between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    interval: Duration,
}

impl Backoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_config(config: &RobotConfig) -> Self {
        Self::new(config.cycle_interval())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleeps for the interval. Returns `false` if `cancel` fired first.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        info!(
            wait_secs = self.interval.as_secs_f64(),
            "waiting for next cycle"
        );
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }
}

/// Extension point run before the loop idles for lack of work.
#[async_trait(?Send)]
pub trait CleanupHook {
    async fn before_idle(&self, config: &RobotConfig);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCleanup;

#[async_trait(?Send)]
impl CleanupHook for NoopCleanup {
    async fn before_idle(&self, _config: &RobotConfig) {}
}

pub struct CycleOrchestratorBuilder {
    config: RobotConfig,
    factory: Box<dyn SessionFactory>,
    authenticator: Option<Box<dyn Authenticator>>,
    queue: Option<Box<dyn WorkSource>>,
    executor: Option<Box<dyn ItemExecutor>>,
    evidence: Option<EvidenceCapturer>,
    cleanup: Option<Box<dyn CleanupHook>>,
    backoff: Option<Backoff>,
}

impl CycleOrchestratorBuilder {
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Box::new(authenticator));
        self
    }

    pub fn queue(mut self, queue: impl WorkSource + 'static) -> Self {
        self.queue = Some(Box::new(queue));
        self
    }

    pub fn executor(mut self, executor: impl ItemExecutor + 'static) -> Self {
        self.executor = Some(Box::new(executor));
        self
    }

    pub fn evidence(mut self, evidence: EvidenceCapturer) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn cleanup(mut self, cleanup: impl CleanupHook + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Missing collaborators default to the CSV queue, form login, metered
    /// logging executor and paths from the configuration.
    pub fn build(self) -> CycleOrchestrator {
        let config = self.config;
        let queue = self
            .queue
            .unwrap_or_else(|| Box::new(CsvWorkQueue::from_config(&config)));
        let executor = self.executor.unwrap_or_else(|| {
            Box::new(MeteredExecutor::new(
                LoggingExecutor,
                MetricsStore::new(config.metrics_path()),
            ))
        });
        let evidence = self
            .evidence
            .unwrap_or_else(|| EvidenceCapturer::from_config(&config));
        let backoff = self
            .backoff
            .unwrap_or_else(|| Backoff::from_config(&config));
        CycleOrchestrator {
            factory: self.factory,
            authenticator: self
                .authenticator
                .unwrap_or_else(|| Box::new(FormAuthenticator::new())),
            queue,
            executor,
            evidence,
            cleanup: self.cleanup.unwrap_or_else(|| Box::new(NoopCleanup)),
            backoff,
            session: None,
            stats: CycleStats::default(),
            config,
        }
    }
}

/// Drives the session/login/queue/item cycle and owns the only session
/// handle. See [`CycleOrchestrator::run_cycle`] for the per-iteration rules.
pub struct CycleOrchestrator {
    config: RobotConfig,
    factory: Box<dyn SessionFactory>,
    authenticator: Box<dyn Authenticator>,
    queue: Box<dyn WorkSource>,
    executor: Box<dyn ItemExecutor>,
    evidence: EvidenceCapturer,
    cleanup: Box<dyn CleanupHook>,
    backoff: Backoff,
    session: Option<Box<dyn Session>>,
    stats: CycleStats,
}

impl fmt::Debug for CycleOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleOrchestrator")
            .field("session", &self.session.as_ref().map(|session| session.id()))
            .field("backoff", &self.backoff)
            .field("stats", &self.stats)
            .finish()
    }
}

impl CycleOrchestrator {
    pub fn builder(
        config: RobotConfig,
        factory: impl SessionFactory + 'static,
    ) -> CycleOrchestratorBuilder {
        CycleOrchestratorBuilder {
            config,
            factory: Box::new(factory),
            authenticator: None,
            queue: None,
            executor: None,
            evidence: None,
            cleanup: None,
            backoff: None,
        }
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Runs cycles until `cancel` fires, then tears the session down.
    /// Cancellation is observed between cycles and during the backoff wait.
    pub async fn run(&mut self, cancel: CancellationToken) -> CycleStats {
        info!(
            wait_secs = self.backoff.interval().as_secs_f64(),
            "cycle loop started"
        );
        while !cancel.is_cancelled() {
            let outcome = self.run_cycle().await;
            if outcome.needs_backoff() {
                self.stats.backoff_waits = self.stats.backoff_waits.saturating_add(1);
                if !self.backoff.wait(&cancel).await {
                    break;
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
        info!("cycle loop stopping");
        self.shutdown().await;
        self.stats.clone()
    }

    /// One iteration: ensure session, probe health, log in, fetch and
    /// execute at most one item. Never sleeps; the caller applies backoff
    /// according to [`CycleOutcome::needs_backoff`].
    ///
    /// A panic anywhere in the iteration discards the session and yields
    /// [`CycleOutcome::Panicked`].
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = match AssertUnwindSafe(self.step()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                error!(panic = %panic_message(payload), "cycle panicked, discarding session");
                self.close_session().await;
                CycleOutcome::Panicked
            }
        };
        self.stats.record(outcome);
        info!(outcome = %outcome, "cycle finished");
        outcome
    }

    async fn step(&mut self) -> CycleOutcome {
        if self.session.is_none() {
            match self.factory.open(&self.config).await {
                Ok(session) => {
                    info!(session = %session.id(), "session opened");
                    self.stats.sessions_opened = self.stats.sessions_opened.saturating_add(1);
                    self.session = Some(session);
                }
                Err(err) => {
                    error!(error = %err, "failed to open session, waiting for next cycle");
                    return CycleOutcome::NoSession;
                }
            }
        }

        let healthy = match self.session.as_deref() {
            Some(session) => session.probe_health().await,
            None => false,
        };
        if !healthy {
            warn!("session failed health check, discarding it");
            self.close_session().await;
            return CycleOutcome::Unhealthy;
        }

        let Some(session) = self.session.as_deref() else {
            return CycleOutcome::NoSession;
        };

        match self.authenticator.authenticate(session, &self.config).await {
            Ok(AuthStatus::Authenticated) | Ok(AuthStatus::NotRequired) => {}
            Err(err) => {
                error!(error = %err, "login failed, waiting for next cycle");
                return CycleOutcome::LoginFailed;
            }
        }

        if !self.queue.initialize() {
            info!("no items to process");
            self.cleanup.before_idle(&self.config).await;
            return CycleOutcome::QueueEmpty;
        }

        let Some(item) = self.queue.fetch_next() else {
            info!("queue is empty");
            self.cleanup.before_idle(&self.config).await;
            return CycleOutcome::QueueEmpty;
        };

        tokio::task::yield_now().await;
        let result = AssertUnwindSafe(self.executor.execute(&item, session, &self.config))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(())) => CycleOutcome::ItemProcessed,
            Ok(Err(err)) => {
                error!(item_id = item.id().unwrap_or("-"), error = %err, "error processing item");
                self.evidence
                    .capture(session, PROCESS_ITEM_EVIDENCE_LABEL)
                    .await;
                CycleOutcome::ItemFailed
            }
            Err(payload) => {
                error!(
                    item_id = item.id().unwrap_or("-"),
                    panic = %panic_message(payload),
                    "item executor panicked"
                );
                self.evidence
                    .capture(session, PROCESS_ITEM_EVIDENCE_LABEL)
                    .await;
                CycleOutcome::ItemFailed
            }
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!(session = %session.id(), "closing session");
            if let Err(err) = session.close().await {
                warn!(session = %session.id(), error = %err, "session close reported an error");
            }
            self.stats.sessions_closed = self.stats.sessions_closed.saturating_add(1);
        }
    }

    /// Tears down the session if one is held. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        self.close_session().await;
    }
}
