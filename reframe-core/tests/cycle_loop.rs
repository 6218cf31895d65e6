use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use reframe_core::testing::{
    FakeSession, FakeSessionFactory, ScriptedAuthenticator, ScriptedExecutor, SessionCall,
};
use reframe_core::{
    AuthError, AuthStatus, Authenticator, CleanupHook, CsvWorkQueue, CycleOrchestrator,
    CycleOutcome, HealthReporter, MeteredExecutor, MetricsRecord, MetricsStore, RobotConfig,
    Session,
};

fn config_in(dir: &Path, csv: Option<&str>) -> RobotConfig {
    let config = RobotConfig::default().with_root(dir);
    if let Some(content) = csv {
        let path = config.queue_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    config
}

/// Cancels the loop the first time it goes idle for lack of work.
struct CancelOnIdle(CancellationToken);

#[async_trait(?Send)]
impl CleanupHook for CancelOnIdle {
    async fn before_idle(&self, _config: &RobotConfig) {
        self.0.cancel();
    }
}

/// Login step that blows up instead of returning an error.
struct PanickingAuthenticator;

#[async_trait(?Send)]
impl Authenticator for PanickingAuthenticator {
    async fn authenticate(
        &self,
        _session: &dyn Session,
        _config: &RobotConfig,
    ) -> Result<AuthStatus, AuthError> {
        panic!("login page layout changed");
    }
}

struct PanickingCleanup;

#[async_trait(?Send)]
impl CleanupHook for PanickingCleanup {
    async fn before_idle(&self, _config: &RobotConfig) {
        panic!("cleanup exploded");
    }
}

#[tokio::test(start_paused = true)]
async fn processes_every_row_then_reports_empty_queue() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id,name\n1,alpha\n2,beta\n"));
    let session = FakeSession::healthy("s1");
    let executor = ScriptedExecutor::default();
    let metrics = MetricsStore::new(config.metrics_path());

    let mut orchestrator =
        CycleOrchestrator::builder(config.clone(), FakeSessionFactory::new([Some(session.clone())]))
            .executor(MeteredExecutor::new(executor.clone(), metrics.clone()))
            .build();

    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::ItemProcessed);
    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::ItemProcessed);
    let third = orchestrator.run_cycle().await;
    assert_eq!(third, CycleOutcome::QueueEmpty);
    assert!(third.needs_backoff());

    assert_eq!(executor.seen(), vec!["1", "2"]);
    assert_eq!(
        metrics.load(),
        MetricsRecord {
            processed_total: 2,
            processed_success: 2,
            processed_error: 0,
        }
    );
    let health = HealthReporter::new(config.health_path()).read().unwrap();
    assert_eq!(health.remaining_item_count, 0);
    assert_eq!(session.probe_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn health_snapshot_counts_down_in_fifo_order() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id\na\nb\nc\n"));
    let executor = ScriptedExecutor::default();
    let health = HealthReporter::new(config.health_path());

    let mut orchestrator = CycleOrchestrator::builder(
        config.clone(),
        FakeSessionFactory::new([Some(FakeSession::healthy("s1"))]),
    )
    .executor(executor.clone())
    .build();

    for expected in [2, 1, 0] {
        assert_eq!(orchestrator.run_cycle().await, CycleOutcome::ItemProcessed);
        assert_eq!(health.read().unwrap().remaining_item_count, expected);
    }
    assert_eq!(executor.seen(), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn launch_failures_back_off_without_login_or_queue() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id\n1\n"));
    let factory = FakeSessionFactory::new([None, None]);
    let authenticator = ScriptedAuthenticator::always(true);
    let executor = ScriptedExecutor::default();

    let mut orchestrator = CycleOrchestrator::builder(config.clone(), factory.clone())
        .authenticator(authenticator.clone())
        .executor(executor.clone())
        .build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let (stats, _) = tokio::join!(orchestrator.run(cancel), async move {
        tokio::time::sleep(Duration::from_secs(200)).await;
        trigger.cancel();
    });

    assert_eq!(factory.open_attempts(), 2);
    assert_eq!(stats.no_session, 2);
    assert_eq!(stats.backoff_waits, 2);
    assert!(authenticator.calls().is_empty());
    assert!(executor.seen().is_empty());
    assert!(!config.health_path().exists());
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_backoff_closes_session_once() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), None);
    let session = FakeSession::healthy("s1");

    let mut orchestrator = CycleOrchestrator::builder(
        config,
        FakeSessionFactory::new([Some(session.clone())]),
    )
    .build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let start = tokio::time::Instant::now();
    let (stats, _) = tokio::join!(orchestrator.run(cancel), async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        trigger.cancel();
    });

    assert!(start.elapsed() < Duration::from_secs(120));
    assert_eq!(stats.queue_empty, 1);
    assert_eq!(stats.sessions_closed, 1);
    assert_eq!(session.close_count(), 1);
    assert!(!orchestrator.has_session());

    orchestrator.shutdown().await;
    assert_eq!(session.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unhealthy_session_is_closed_before_a_new_one_opens() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id\n1\n"));
    let stale = FakeSession::unhealthy("stale");
    let fresh = FakeSession::healthy("fresh");
    let factory = FakeSessionFactory::new([Some(stale.clone()), Some(fresh.clone())]);
    let authenticator = ScriptedAuthenticator::always(true);

    let mut orchestrator = CycleOrchestrator::builder(config, factory.clone())
        .authenticator(authenticator.clone())
        .executor(ScriptedExecutor::default())
        .build();

    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::Unhealthy);
    assert_eq!(stale.close_count(), 1);
    assert_eq!(factory.open_attempts(), 1);
    assert!(!orchestrator.has_session());

    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::ItemProcessed);
    assert_eq!(factory.open_attempts(), 2);
    assert_eq!(authenticator.calls(), vec!["fresh"]);
    assert_eq!(stale.close_count(), 1);
    assert_eq!(fresh.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn login_failure_keeps_session_for_next_cycle() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id\n1\n"));
    let session = FakeSession::healthy("s1");
    let factory = FakeSessionFactory::new([Some(session.clone())]);
    let authenticator = ScriptedAuthenticator::new([false], true);
    let executor = ScriptedExecutor::default();

    let mut orchestrator = CycleOrchestrator::builder(config, factory.clone())
        .authenticator(authenticator.clone())
        .executor(executor.clone())
        .build();

    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::LoginFailed);
    assert!(orchestrator.has_session());
    assert_eq!(session.close_count(), 0);
    assert!(executor.seen().is_empty());

    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::ItemProcessed);
    assert_eq!(factory.open_attempts(), 1);
    assert_eq!(authenticator.calls(), vec!["s1", "s1"]);
}

#[tokio::test(start_paused = true)]
async fn failed_item_is_counted_and_evidenced_without_backoff() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id\n1\n2\n3\n"));
    let session = FakeSession::healthy("s1");
    let executor = ScriptedExecutor::failing_ids(["2"]);
    let metrics = MetricsStore::new(config.metrics_path());
    let cancel = CancellationToken::new();

    let mut orchestrator = CycleOrchestrator::builder(
        config.clone(),
        FakeSessionFactory::new([Some(session.clone())]),
    )
    .executor(MeteredExecutor::new(executor.clone(), metrics.clone()))
    .cleanup(CancelOnIdle(cancel.clone()))
    .build();

    let stats = orchestrator.run(cancel).await;

    assert_eq!(executor.seen(), vec!["1", "2", "3"]);
    assert_eq!(stats.item_processed, 2);
    assert_eq!(stats.item_failed, 1);
    assert_eq!(stats.queue_empty, 1);
    assert_eq!(stats.backoff_waits, 1);
    assert_eq!(
        metrics.load(),
        MetricsRecord {
            processed_total: 3,
            processed_success: 2,
            processed_error: 1,
        }
    );

    assert_eq!(session.screenshot_count(), 1);
    let evidence: Vec<_> = std::fs::read_dir(config.screenshot_folder())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(evidence.len(), 1);
    assert!(evidence[0].starts_with("process_item_"));
    assert!(evidence[0].ends_with(".png"));
    assert_eq!(session.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn executor_panic_does_not_stop_the_loop() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id\nboom\nok\n"));
    let session = FakeSession::healthy("s1").failing_screenshot();
    let executor = ScriptedExecutor::panicking_ids(["boom"]);

    let mut orchestrator = CycleOrchestrator::builder(
        config,
        FakeSessionFactory::new([Some(session.clone())]),
    )
    .executor(executor.clone())
    .build();

    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::ItemFailed);
    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::ItemProcessed);
    assert_eq!(executor.seen(), vec!["boom", "ok"]);
    assert!(session.calls().contains(&SessionCall::Screenshot));
}

#[tokio::test(start_paused = true)]
async fn unreadable_queue_idles_like_an_empty_one() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id,name\n1\n"));
    let executor = ScriptedExecutor::default();

    let mut orchestrator = CycleOrchestrator::builder(
        config.clone(),
        FakeSessionFactory::new([Some(FakeSession::healthy("s1"))]),
    )
    .queue(CsvWorkQueue::from_config(&config))
    .executor(executor.clone())
    .build();

    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::QueueEmpty);
    assert!(executor.seen().is_empty());
    assert!(orchestrator.has_session());
}

#[tokio::test(start_paused = true)]
async fn authenticator_panic_still_tears_down_session() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), Some("id\n1\n"));
    let session = FakeSession::healthy("s1");
    let executor = ScriptedExecutor::default();

    let mut orchestrator = CycleOrchestrator::builder(
        config,
        FakeSessionFactory::new([Some(session.clone())]),
    )
    .authenticator(PanickingAuthenticator)
    .executor(executor.clone())
    .build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let (stats, _) = tokio::join!(orchestrator.run(cancel), async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.backoff_waits, 1);
    assert_eq!(stats.sessions_closed, 1);
    assert_eq!(session.close_count(), 1);
    assert!(!orchestrator.has_session());
    assert!(executor.seen().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cleanup_hook_panic_discards_session_and_reopens() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path(), None);
    let first = FakeSession::healthy("first");
    let second = FakeSession::healthy("second");
    let factory = FakeSessionFactory::new([Some(first.clone()), Some(second.clone())]);

    let mut orchestrator = CycleOrchestrator::builder(config, factory.clone())
        .cleanup(PanickingCleanup)
        .build();

    let outcome = orchestrator.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Panicked);
    assert!(outcome.needs_backoff());
    assert_eq!(first.close_count(), 1);
    assert!(!orchestrator.has_session());

    assert_eq!(orchestrator.run_cycle().await, CycleOutcome::Panicked);
    assert_eq!(factory.open_attempts(), 2);
    assert_eq!(second.close_count(), 1);
    assert_eq!(orchestrator.stats().panicked, 2);
}
