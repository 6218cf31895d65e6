use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use tracing::{error, warn};

use crate::error::{ConfigError, Result};

pub const DEFAULT_USERNAME_SELECTOR: &str = r#"input[name="username"]"#;
pub const DEFAULT_PASSWORD_SELECTOR: &str = r#"input[type="password"]"#;
pub const DEFAULT_SUBMIT_SELECTOR: &str = r#"button[type="submit"]"#;
pub const DEFAULT_WAIT_MINUTES: f64 = 2.0;
pub const DEFAULT_LOGIN_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserKind {
    #[default]
    Chrome,
    Edge,
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Edge => "edge",
        };
        f.write_str(label)
    }
}

/// Credential value that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

/// Settings bundle for one worker process. Loaded once, shared read-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub browser: BrowserKind,
    pub browser_executable: Option<PathBuf>,
    #[serde(deserialize_with = "flexible_bool")]
    pub headless: bool,
    pub download_dir: Option<PathBuf>,
    pub profiles_dir: Option<PathBuf>,
    pub wait_time_in_minutes: f64,
    #[serde(alias = "limpar_cache_no_start", deserialize_with = "flexible_bool")]
    pub clean_cache_on_start: bool,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub success_check_selector: Option<String>,
    pub login_timeout_seconds: u64,
    pub csv_queue_path: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub metrics_path: Option<PathBuf>,
    pub health_path: Option<PathBuf>,
    pub screenshot_folder: Option<PathBuf>,
    pub base_dir: Option<PathBuf>,
    #[serde(skip)]
    pub(crate) root: PathBuf,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chrome,
            browser_executable: None,
            headless: true,
            download_dir: None,
            profiles_dir: None,
            wait_time_in_minutes: DEFAULT_WAIT_MINUTES,
            clean_cache_on_start: true,
            url: None,
            username: None,
            password: None,
            username_selector: DEFAULT_USERNAME_SELECTOR.to_string(),
            password_selector: DEFAULT_PASSWORD_SELECTOR.to_string(),
            submit_selector: DEFAULT_SUBMIT_SELECTOR.to_string(),
            success_check_selector: None,
            login_timeout_seconds: DEFAULT_LOGIN_TIMEOUT_SECONDS,
            csv_queue_path: None,
            state_path: None,
            metrics_path: None,
            health_path: None,
            screenshot_folder: None,
            base_dir: None,
            root: PathBuf::from("."),
        }
    }
}

impl RobotConfig {
    /// Loads the settings file at `path`. A missing, unreadable or
    /// unparsable file is logged and the worker starts with defaults.
    /// Relative paths resolve against `root` unless the file sets `base_dir`.
    pub fn load<P: AsRef<Path>, R: AsRef<Path>>(path: P, root: R) -> Self {
        let path = path.as_ref();
        let config = if path.exists() {
            Self::from_file(path).unwrap_or_else(|err| {
                error!(error = %err, "failed to load config, using defaults");
                RobotConfig::default()
            })
        } else {
            error!(path = %path.display(), "config file not found, using defaults");
            RobotConfig::default()
        };
        config.with_root(root)
    }

    /// Strict variant of [`RobotConfig::load`]: any read or parse failure is
    /// returned. The root is left at `.`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_file(path.as_ref())
    }

    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    pub fn root(&self) -> &Path {
        self.base_dir.as_deref().unwrap_or(&self.root)
    }

    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }

    fn resolve_or(&self, value: Option<&Path>, fallback: &str) -> PathBuf {
        match value {
            Some(path) => self.resolve_path(path),
            None => self.resolve_path(fallback),
        }
    }

    pub fn queue_path(&self) -> PathBuf {
        self.resolve_or(self.csv_queue_path.as_deref(), "data/queue.csv")
    }

    pub fn state_path(&self) -> PathBuf {
        self.resolve_or(self.state_path.as_deref(), "logs/state.json")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.resolve_or(self.metrics_path.as_deref(), "logs/metrics.json")
    }

    pub fn health_path(&self) -> PathBuf {
        self.resolve_or(self.health_path.as_deref(), "logs/health.json")
    }

    pub fn screenshot_folder(&self) -> PathBuf {
        self.resolve_or(self.screenshot_folder.as_deref(), "logs/screenshots")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.resolve_or(self.download_dir.as_deref(), "downloads")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.resolve_or(self.profiles_dir.as_deref(), "cache/profiles")
    }

    /// Idle time between cycles. Negative or non-finite values fall back to
    /// the default interval.
    pub fn cycle_interval(&self) -> Duration {
        match Duration::try_from_secs_f64(self.wait_time_in_minutes * 60.0) {
            Ok(interval) => interval,
            Err(_) => {
                warn!(
                    value = self.wait_time_in_minutes,
                    "invalid wait_time_in_minutes, using default"
                );
                Duration::from_secs_f64(DEFAULT_WAIT_MINUTES * 60.0)
            }
        }
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_seconds)
    }

    /// Returns `(url, username, password)` when all three are configured and
    /// non-empty.
    pub fn credentials(&self) -> Option<(&str, &str, &str)> {
        let url = self.url.as_deref().filter(|value| !value.is_empty())?;
        let user = self.username.as_deref().filter(|value| !value.is_empty())?;
        let pwd = self
            .password
            .as_ref()
            .map(Secret::expose)
            .filter(|value| !value.is_empty())?;
        Some((url, user, pwd))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Int(i64),
    Text(String),
}

fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match BoolLike::deserialize(deserializer)? {
        BoolLike::Bool(value) => value,
        BoolLike::Int(value) => value != 0,
        BoolLike::Text(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        ),
    })
}

fn load_file<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            source,
            path: path.to_path_buf(),
        })
    } else {
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = RobotConfig::load(dir.path().join("absent.toml"), dir.path());
        assert!(config.headless);
        assert!(config.clean_cache_on_start);
        assert_eq!(config.cycle_interval(), Duration::from_secs(120));
        assert_eq!(config.username_selector, DEFAULT_USERNAME_SELECTOR);
        assert_eq!(config.queue_path(), dir.path().join("data/queue.csv"));
        assert!(config.credentials().is_none());
    }

    #[test]
    fn parses_toml_with_string_booleans() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("robot.toml");
        std::fs::write(
            &path,
            r#"
browser = "edge"
headless = "Yes"
limpar_cache_no_start = "0"
wait_time_in_minutes = 0.5
url = "https://portal.example.com/login"
username = "bot"
password = "s3cret"
metrics_path = "/var/lib/robot/metrics.json"
"#,
        )
        .unwrap();

        let config = RobotConfig::load(&path, dir.path());
        assert_eq!(config.browser, BrowserKind::Edge);
        assert!(config.headless);
        assert!(!config.clean_cache_on_start);
        assert_eq!(config.cycle_interval(), Duration::from_secs(30));
        assert_eq!(
            config.metrics_path(),
            PathBuf::from("/var/lib/robot/metrics.json")
        );
        let (url, user, pwd) = config.credentials().unwrap();
        assert_eq!(url, "https://portal.example.com/login");
        assert_eq!(user, "bot");
        assert_eq!(pwd, "s3cret");
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn parses_json_bundle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"headless": 0, "wait_time_in_minutes": 1, "screenshot_folder": "shots", "base_dir": "/opt/robot"}"#,
        )
        .unwrap();

        let config = RobotConfig::load(&path, dir.path());
        assert!(!config.headless);
        assert_eq!(config.cycle_interval(), Duration::from_secs(60));
        assert_eq!(
            config.screenshot_folder(),
            PathBuf::from("/opt/robot/shots")
        );
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("robot.toml");
        std::fs::write(&path, "headless = false\nwait_time_in_minutes = [").unwrap();

        let err = RobotConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let config = RobotConfig::load(&path, dir.path());
        assert!(config.headless);
        assert_eq!(config.cycle_interval(), Duration::from_secs(120));
        assert_eq!(config.metrics_path(), dir.path().join("logs/metrics.json"));
    }

    #[test]
    fn malformed_json_is_a_typed_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{\"headless\": ").unwrap();
        let err = RobotConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
        assert!(RobotConfig::load(&path, dir.path()).headless);
    }

    #[test]
    fn negative_interval_falls_back_to_default() {
        let config = RobotConfig {
            wait_time_in_minutes: -3.0,
            ..RobotConfig::default()
        };
        assert_eq!(config.cycle_interval(), Duration::from_secs(120));
    }

    #[test]
    fn empty_credentials_mean_no_login() {
        let config = RobotConfig {
            url: Some("https://portal.example.com".into()),
            username: Some(String::new()),
            password: Some(Secret::new("x")),
            ..RobotConfig::default()
        };
        assert!(config.credentials().is_none());
    }
}
