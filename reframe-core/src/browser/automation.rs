use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{BrowserKind, RobotConfig};

use super::error::{BrowserError, BrowserResult};
use super::profile::{BrowserProfile, ProfileManager};
use super::session::{Session, SessionFactory};

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const HANDLER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const EDGE_CANDIDATES: &[&str] = &[
    "/usr/bin/microsoft-edge",
    "/usr/bin/microsoft-edge-stable",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
];

/// Launches one Chromium-family browser per session, each on a fresh
/// profile directory.
#[derive(Debug, Clone)]
pub struct ChromiumSessionFactory {
    profiles: ProfileManager,
}

impl ChromiumSessionFactory {
    pub fn new(profiles: ProfileManager) -> Self {
        Self { profiles }
    }

    pub fn from_config(config: &RobotConfig) -> BrowserResult<Self> {
        Ok(Self::new(ProfileManager::from_config(config)?))
    }

    pub fn profile_manager(&self) -> &ProfileManager {
        &self.profiles
    }

    fn executable(config: &RobotConfig) -> BrowserResult<Option<PathBuf>> {
        if let Some(path) = &config.browser_executable {
            return Ok(Some(config.resolve_path(path)));
        }
        match config.browser {
            // chromiumoxide locates a local Chrome/Chromium on its own.
            BrowserKind::Chrome => Ok(None),
            BrowserKind::Edge => EDGE_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
                .map(Some)
                .ok_or_else(|| {
                    BrowserError::Configuration(
                        "edge executable not found, set browser_executable".to_string(),
                    )
                }),
        }
    }

    fn build_chromium_config(
        &self,
        config: &RobotConfig,
        profile: &BrowserProfile,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile.path())
            .no_sandbox()
            .request_timeout(config.login_timeout());

        if let Some(executable) = Self::executable(config)? {
            builder = builder.chrome_executable(executable);
        }
        if !config.headless {
            builder = builder.with_head();
        }

        let args = vec![
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
        ];
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }

    async fn launch(
        &self,
        config: &RobotConfig,
        profile: &BrowserProfile,
    ) -> BrowserResult<ChromiumSession> {
        let download_dir = config.download_dir();
        std::fs::create_dir_all(&download_dir)?;

        let chromium_config = self.build_chromium_config(config, profile)?;
        info!(
            session = %profile.id(),
            browser = %config.browser,
            headless = config.headless,
            "launching browser session"
        );

        let (mut browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler reported error");
                }
            }
        });

        let page = match open_page(&browser, &download_dir).await {
            Ok(page) => page,
            Err(err) => {
                if let Err(close_err) = browser.close().await {
                    warn!(error = %close_err, "failed to close browser after setup failure");
                }
                handler_task.abort();
                return Err(err);
            }
        };

        Ok(ChromiumSession {
            browser,
            page,
            profile: profile.clone(),
            handler_task: Some(handler_task),
            closed: false,
        })
    }
}

async fn open_page(browser: &Browser, download_dir: &Path) -> BrowserResult<Page> {
    let behavior = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(download_dir.to_string_lossy().to_string())
        .build()
        .map_err(BrowserError::Configuration)?;
    browser.execute(behavior).await?;
    Ok(browser.new_page("about:blank").await?)
}

#[async_trait(?Send)]
impl SessionFactory for ChromiumSessionFactory {
    async fn open(&self, config: &RobotConfig) -> BrowserResult<Box<dyn Session>> {
        let profile = self.profiles.allocate()?;
        match self.launch(config, &profile).await {
            Ok(session) => Ok(Box::new(session)),
            Err(err) => {
                if let Err(cleanup) = profile.remove() {
                    warn!(error = %cleanup, "failed to remove unused profile");
                }
                Err(err)
            }
        }
    }
}

#[derive(Debug)]
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    profile: BrowserProfile,
    handler_task: Option<JoinHandle<()>>,
    closed: bool,
}

impl ChromiumSession {
    pub fn page(&self) -> &Page {
        &self.page
    }

    fn ensure_open(&self) -> BrowserResult<()> {
        if self.closed {
            Err(BrowserError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn locate(&self, selector: &str, timeout: Duration) -> BrowserResult<Element> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(BrowserError::ElementNotFound(format!(
                            "{selector} after {timeout:?} ({err})"
                        )));
                    }
                }
            }
            sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait(?Send)]
impl Session for ChromiumSession {
    fn id(&self) -> &str {
        self.profile.id()
    }

    async fn probe_health(&self) -> bool {
        if self.closed {
            return false;
        }
        match self.page.url().await {
            Ok(_) => true,
            Err(err) => {
                debug!(session = %self.profile.id(), error = %err, "health probe failed");
                false
            }
        }
    }

    async fn goto(&self, url: &str) -> BrowserResult<()> {
        self.ensure_open()?;
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> BrowserResult<()> {
        let element = self.locate(selector, timeout).await?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await?;
        element.click().await?;
        element.type_str(value).await?;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let element = self.locate(selector, timeout).await?;
        element.click().await?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        self.locate(selector, timeout).await.map(|_| ())
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        self.ensure_open()?;
        let params = ScreenshotParams::builder().build();
        self.page
            .screenshot(params)
            .await
            .map_err(|err| BrowserError::Screenshot(err.to_string()))
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!(session = %self.profile.id(), "closing browser session");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(mut handle) = self.handler_task.take() {
            match tokio::time::timeout(HANDLER_SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "browser handler join error"),
                Err(_) => {
                    warn!(session = %self.profile.id(), "browser handler still running, aborting it");
                    handle.abort();
                }
            }
        }
        if let Err(err) = self.profile.remove() {
            warn!(error = %err, "failed to remove session profile");
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handler_task.take() {
            if !handle.is_finished() {
                warn!(
                    session = %self.profile.id(),
                    "browser session dropped without explicit close"
                );
                handle.abort();
            }
        }
    }
}
