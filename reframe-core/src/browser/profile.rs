use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RobotConfig;

use super::error::{BrowserError, BrowserResult};

/// Throwaway user-data directory for one browser session.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    id: String,
    path: PathBuf,
    created_at: DateTime<Utc>,
}

impl BrowserProfile {
    pub fn new(base: &Path) -> BrowserResult<Self> {
        let id = Uuid::new_v4().to_string();
        let path = base.join(&id);
        std::fs::create_dir_all(&path)
            .map_err(|err| BrowserError::Profile(format!("failed to create profile dir: {err}")))?;
        Ok(Self {
            id,
            path,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn remove(&self) -> BrowserResult<()> {
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path).map_err(|err| {
                BrowserError::Profile(format!("failed to remove profile dir: {err}"))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ProfileManager {
    base_dir: PathBuf,
}

impl ProfileManager {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> BrowserResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|err| {
            BrowserError::Profile(format!("failed to create profile base dir: {err}"))
        })?;
        Ok(Self { base_dir })
    }

    pub fn from_config(config: &RobotConfig) -> BrowserResult<Self> {
        Self::new(config.profiles_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn allocate(&self) -> BrowserResult<BrowserProfile> {
        BrowserProfile::new(&self.base_dir)
    }

    /// Removes every profile directory left behind by earlier runs. Entries
    /// that cannot be removed are logged and skipped.
    pub fn clean_all(&self) -> BrowserResult<usize> {
        let entries = std::fs::read_dir(&self.base_dir).map_err(|err| {
            BrowserError::Profile(format!("failed to list profile directory: {err}"))
        })?;
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove stale profile");
                }
            }
        }
        Ok(removed)
    }
}
