//! In-memory doubles for the browser session and the cycle collaborators.
//!
//! They record every interaction so tests can assert on the exact sequence
//! the orchestrator drove, without launching a browser.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{AuthError, AuthStatus, Authenticator};
use crate::browser::{BrowserError, BrowserResult, Session, SessionFactory};
use crate::config::RobotConfig;
use crate::executor::{ExecutionError, ItemExecutor};
use crate::queue::WorkItem;

const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Probe,
    Goto(String),
    Fill(String, String),
    Click(String),
    WaitFor(String),
    Screenshot,
    Close,
}

#[derive(Debug, Default)]
struct FakeSessionState {
    healthy: bool,
    screenshot_fails: bool,
    missing: HashSet<String>,
    calls: Vec<SessionCall>,
}

/// Scriptable [`Session`]. Clones share state, so a test can keep a clone
/// and inspect what happened after handing the session to the orchestrator.
#[derive(Debug, Clone)]
pub struct FakeSession {
    id: String,
    state: Arc<Mutex<FakeSessionState>>,
}

impl FakeSession {
    fn with_health(id: &str, healthy: bool) -> Self {
        Self {
            id: id.to_string(),
            state: Arc::new(Mutex::new(FakeSessionState {
                healthy,
                ..FakeSessionState::default()
            })),
        }
    }

    pub fn healthy(id: &str) -> Self {
        Self::with_health(id, true)
    }

    pub fn unhealthy(id: &str) -> Self {
        Self::with_health(id, false)
    }

    pub fn missing_selector(self, selector: &str) -> Self {
        self.state.lock().unwrap().missing.insert(selector.to_string());
        self
    }

    pub fn failing_screenshot(self) -> Self {
        self.state.lock().unwrap().screenshot_fails = true;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().healthy = healthy;
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| **call != SessionCall::Probe)
            .cloned()
            .collect()
    }

    pub fn probe_count(&self) -> usize {
        self.count(&SessionCall::Probe)
    }

    pub fn close_count(&self) -> usize {
        self.count(&SessionCall::Close)
    }

    pub fn screenshot_count(&self) -> usize {
        self.count(&SessionCall::Screenshot)
    }

    fn count(&self, wanted: &SessionCall) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| *call == wanted)
            .count()
    }

    fn record(&self, call: SessionCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn element(&self, selector: &str) -> BrowserResult<()> {
        if self.state.lock().unwrap().missing.contains(selector) {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait(?Send)]
impl Session for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn probe_health(&self) -> bool {
        self.record(SessionCall::Probe);
        self.state.lock().unwrap().healthy
    }

    async fn goto(&self, url: &str) -> BrowserResult<()> {
        self.record(SessionCall::Goto(url.to_string()));
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> BrowserResult<()> {
        self.record(SessionCall::Fill(selector.to_string(), value.to_string()));
        self.element(selector)
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> BrowserResult<()> {
        self.record(SessionCall::Click(selector.to_string()));
        self.element(selector)
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> BrowserResult<()> {
        self.record(SessionCall::WaitFor(selector.to_string()));
        self.element(selector)
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        self.record(SessionCall::Screenshot);
        if self.state.lock().unwrap().screenshot_fails {
            Err(BrowserError::Screenshot("target closed".to_string()))
        } else {
            Ok(FAKE_PNG.to_vec())
        }
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.record(SessionCall::Close);
        Ok(())
    }
}

/// Hands out pre-scripted sessions; `None` entries, and an exhausted
/// script, simulate launch failures.
#[derive(Debug, Clone, Default)]
pub struct FakeSessionFactory {
    script: Arc<Mutex<VecDeque<Option<FakeSession>>>>,
    opened: Arc<Mutex<usize>>,
}

impl FakeSessionFactory {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Option<FakeSession>>,
    {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            opened: Arc::new(Mutex::new(0)),
        }
    }

    pub fn open_attempts(&self) -> usize {
        *self.opened.lock().unwrap()
    }
}

#[async_trait(?Send)]
impl SessionFactory for FakeSessionFactory {
    async fn open(&self, _config: &RobotConfig) -> BrowserResult<Box<dyn Session>> {
        *self.opened.lock().unwrap() += 1;
        match self.script.lock().unwrap().pop_front().flatten() {
            Some(session) => Ok(Box::new(session)),
            None => Err(BrowserError::Launch("browser unavailable".to_string())),
        }
    }
}

/// Authenticator returning scripted results; once the script runs out it
/// keeps returning the fallback.
#[derive(Debug, Clone)]
pub struct ScriptedAuthenticator {
    script: Arc<Mutex<VecDeque<bool>>>,
    fallback: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAuthenticator {
    pub fn always(success: bool) -> Self {
        Self::new([], success)
    }

    pub fn new<I: IntoIterator<Item = bool>>(script: I, fallback: bool) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Session ids seen, one entry per call.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl Authenticator for ScriptedAuthenticator {
    async fn authenticate(
        &self,
        session: &dyn Session,
        _config: &RobotConfig,
    ) -> Result<AuthStatus, AuthError> {
        self.calls.lock().unwrap().push(session.id().to_string());
        let success = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        if success {
            Ok(AuthStatus::Authenticated)
        } else {
            Err(AuthError::Step {
                step: "submit",
                source: BrowserError::ElementNotFound("login form".to_string()),
            })
        }
    }
}

/// Executor that fails or panics for selected item ids and records the
/// ids it was given.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    failing: HashSet<String>,
    panicking: HashSet<String>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn failing_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn panicking_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            panicking: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl ItemExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        item: &WorkItem,
        _session: &dyn Session,
        _config: &RobotConfig,
    ) -> Result<(), ExecutionError> {
        let id = item.id().unwrap_or_default().to_string();
        self.seen.lock().unwrap().push(id.clone());
        if self.panicking.contains(&id) {
            panic!("scripted panic for item {id}");
        }
        if self.failing.contains(&id) {
            return Err(ExecutionError::Business(format!("item {id} rejected")));
        }
        Ok(())
    }
}
