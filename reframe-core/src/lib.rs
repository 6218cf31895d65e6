pub mod auth;
pub mod browser;
pub mod config;
pub mod cycle;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod health;
pub mod metrics;
mod persist;
pub mod queue;
pub mod testing;

pub use auth::{AuthError, AuthStatus, Authenticator, FormAuthenticator};
pub use browser::{
    BrowserError, BrowserProfile, BrowserResult, ChromiumSession, ChromiumSessionFactory,
    ProfileManager, Session, SessionFactory,
};
pub use config::{BrowserKind, RobotConfig, Secret};
pub use cycle::{
    Backoff, CleanupHook, CycleOrchestrator, CycleOrchestratorBuilder, CycleOutcome, CycleStats,
    NoopCleanup, PROCESS_ITEM_EVIDENCE_LABEL,
};
pub use error::{ConfigError, PersistError, Result};
pub use evidence::EvidenceCapturer;
pub use executor::{ExecutionError, ItemExecutor, LoggingExecutor, MeteredExecutor};
pub use health::{HealthReporter, HealthSnapshot};
pub use metrics::{MetricsRecord, MetricsStore};
pub use queue::{CsvWorkQueue, QueueError, QueueResult, WorkItem, WorkSource};
