use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::browser::{BrowserError, Session};
use crate::config::RobotConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated,
    /// No target or credentials configured; nothing to do.
    NotRequired,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid login url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("login step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        source: BrowserError,
    },
}

/// Logs a session into the target system. Implementations must be
/// idempotent: the orchestrator calls this once per cycle.
#[async_trait(?Send)]
pub trait Authenticator {
    async fn authenticate(
        &self,
        session: &dyn Session,
        config: &RobotConfig,
    ) -> Result<AuthStatus, AuthError>;
}

/// Fills a username/password form located by CSS selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormAuthenticator;

impl FormAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

fn step(step: &'static str) -> impl FnOnce(BrowserError) -> AuthError {
    move |source| AuthError::Step { step, source }
}

#[async_trait(?Send)]
impl Authenticator for FormAuthenticator {
    async fn authenticate(
        &self,
        session: &dyn Session,
        config: &RobotConfig,
    ) -> Result<AuthStatus, AuthError> {
        let Some((url, user, pwd)) = config.credentials() else {
            info!("login skipped: url/username/password not configured");
            return Ok(AuthStatus::NotRequired);
        };
        url::Url::parse(url).map_err(|source| AuthError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let timeout = config.login_timeout();
        let result = async {
            session.goto(url).await.map_err(step("navigate"))?;
            session
                .fill(&config.username_selector, user, timeout)
                .await
                .map_err(step("username"))?;
            session
                .fill(&config.password_selector, pwd, timeout)
                .await
                .map_err(step("password"))?;
            session
                .click(&config.submit_selector, timeout)
                .await
                .map_err(step("submit"))?;
            if let Some(selector) = config
                .success_check_selector
                .as_deref()
                .filter(|selector| !selector.is_empty())
            {
                session
                    .wait_for(selector, timeout)
                    .await
                    .map_err(step("success check"))?;
            }
            Ok::<_, AuthError>(AuthStatus::Authenticated)
        }
        .await;

        match &result {
            Ok(_) => info!(session = %session.id(), "login completed"),
            Err(err) => warn!(session = %session.id(), error = %err, "login failed"),
        }
        result
    }
}
