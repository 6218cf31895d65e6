use std::time::Duration;

use async_trait::async_trait;

use crate::config::RobotConfig;

use super::error::BrowserResult;

/// Handle to one live browser session.
///
/// The orchestrator only relies on [`Session::probe_health`] and
/// [`Session::close`]; the remaining operations exist for the authenticator
/// and item executors. `close` must tolerate being called more than once.
#[async_trait(?Send)]
pub trait Session {
    fn id(&self) -> &str;
    async fn probe_health(&self) -> bool;
    async fn goto(&self, url: &str) -> BrowserResult<()>;
    /// Waits for `selector`, clears it and types `value`.
    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> BrowserResult<()>;
    async fn click(&self, selector: &str, timeout: Duration) -> BrowserResult<()>;
    async fn wait_for(&self, selector: &str, timeout: Duration) -> BrowserResult<()>;
    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> BrowserResult<Vec<u8>>;
    async fn close(&mut self) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait SessionFactory {
    async fn open(&self, config: &RobotConfig) -> BrowserResult<Box<dyn Session>>;
}
