use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::PersistError;

/// Overwrites `path` with pretty-printed JSON. The payload goes to a sibling
/// temp file first so readers never observe a half-written file.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        source,
        path: path.to_path_buf(),
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(io_err)?;
    let payload = serde_json::to_vec_pretty(value)?;
    let mut file = NamedTempFile::new_in(parent).map_err(io_err)?;
    file.write_all(&payload).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    file.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

/// Reads a JSON document, returning `None` when the file is missing or does
/// not decode.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read state file");
            return None;
        }
    };
    match serde_json::from_slice(&content) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "discarding unreadable state file");
            None
        }
    }
}
