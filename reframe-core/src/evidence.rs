use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::browser::Session;
use crate::config::RobotConfig;

/// Saves screenshots of a failing session for post-mortem analysis.
#[derive(Debug, Clone)]
pub struct EvidenceCapturer {
    folder: PathBuf,
}

impl EvidenceCapturer {
    pub fn new<P: AsRef<Path>>(folder: P) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &RobotConfig) -> Self {
        Self::new(config.screenshot_folder())
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn artifact_name(label: &str, at: DateTime<Local>) -> String {
        let ts = at.format("%Y%m%d_%H%M%S_%6f");
        if label.is_empty() {
            format!("{ts}.png")
        } else {
            format!("{label}_{ts}.png")
        }
    }

    /// Writes a screenshot named after `label` and returns its path. Never
    /// fails: any problem is logged and yields `None`.
    pub async fn capture(&self, session: &dyn Session, label: &str) -> Option<PathBuf> {
        if let Err(err) = tokio::fs::create_dir_all(&self.folder).await {
            warn!(folder = %self.folder.display(), error = %err, "cannot create evidence folder");
            return None;
        }
        let bytes = match session.screenshot().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(session = %session.id(), error = %err, "evidence screenshot failed");
                return None;
            }
        };
        let path = self.folder.join(Self::artifact_name(label, Local::now()));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => {
                info!(path = %path.display(), "evidence captured");
                Some(path)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to write evidence");
                None
            }
        }
    }
}
