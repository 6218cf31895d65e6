use std::future::Future;
use std::path::{Path, PathBuf};

use clap::Parser;
use reframe_core::{
    BrowserError, ChromiumSessionFactory, CycleOrchestrator, CycleStats, RobotConfig,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("browser setup failed: {0}")]
    Browser(#[from] BrowserError),
    #[error("invalid log filter '{filter}': {message}")]
    LogFilter { filter: String, message: String },
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Cyclic browser automation worker", long_about = None)]
pub struct Cli {
    /// Settings file (TOML, or JSON by extension), relative to --root
    #[arg(long, default_value = "config/robot.toml")]
    pub config: PathBuf,
    /// Install root used to resolve relative paths
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Log filter when RUST_LOG is unset (e.g. "info", "reframe_core=debug")
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.root.join(&self.config)
    }
}

/// Installs the fmt subscriber. `RUST_LOG` wins over `level`. Calling it
/// again once a subscriber is installed does nothing.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|err| AppError::LogFilter {
            filter: level.to_string(),
            message: err.to_string(),
        })?,
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    init_logging(&cli.log_level)?;

    let config_path = cli.config_path();
    let config = RobotConfig::load(&config_path, &cli.root);
    info!(
        config = %config_path.display(),
        root = %config.root().display(),
        browser = %config.browser,
        headless = config.headless,
        "reframe worker starting"
    );

    let factory = prepare_factory(&config)?;
    let cancel = CancellationToken::new();
    let listener = spawn_signal_listener(cancel.clone());

    let mut orchestrator = CycleOrchestrator::builder(config, factory).build();
    let stats = orchestrator.run(cancel).await;
    listener.abort();

    log_summary(&stats);
    Ok(())
}

/// Creates the session factory, wiping leftover browser profiles first when
/// `clean_cache_on_start` is set.
pub fn prepare_factory(config: &RobotConfig) -> Result<ChromiumSessionFactory> {
    let factory = ChromiumSessionFactory::from_config(config)?;
    if config.clean_cache_on_start {
        clean_profiles(&factory, config.profiles_dir().as_path());
    }
    Ok(factory)
}

fn clean_profiles(factory: &ChromiumSessionFactory, dir: &Path) {
    match factory.profile_manager().clean_all() {
        Ok(0) => info!(dir = %dir.display(), "profile cache already clean"),
        Ok(removed) => info!(dir = %dir.display(), removed, "profile cache cleaned"),
        Err(err) => warn!(dir = %dir.display(), error = %err, "failed to clean profile cache"),
    }
}

/// Exit status used when a second signal forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

/// First signal cancels `cancel` for a graceful stop. A second one exits the
/// process at once, for when teardown itself hangs.
pub fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        relay_signals(cancel, wait_for_termination).await;
        std::process::exit(FORCED_EXIT_CODE);
    })
}

/// Cancels on the first signal and returns on the second.
pub async fn relay_signals<S, F>(cancel: CancellationToken, mut next_signal: S)
where
    S: FnMut() -> F,
    F: Future<Output = ()>,
{
    next_signal().await;
    info!("termination requested, shutting down (signal again to force exit)");
    cancel.cancel();
    next_signal().await;
    warn!("second termination signal, exiting without cleanup");
}

async fn wait_for_termination() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

fn log_summary(stats: &CycleStats) {
    info!(
        cycles = stats.cycles,
        processed = stats.item_processed,
        failed = stats.item_failed,
        sessions_opened = stats.sessions_opened,
        sessions_closed = stats.sessions_closed,
        "reframe worker stopped"
    );
}
