//! Filesystem locations used by voxrelay.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Name of the per-user application data directory.
pub const APP_DIR_NAME: &str = "voxrelay";

/// Errors that can occur during path resolution and directory operations.
#[derive(Debug, Error)]
pub enum PathError {
    /// A path was expected to be a directory but was not.
    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),

    /// Failed to create a directory.
    #[error("Failed to create directory {path}: {reason}")]
    CreateFailed { path: PathBuf, reason: String },

    /// A directory is not writable.
    #[error("Directory {path} is not writable: {reason}")]
    NotWritable { path: PathBuf, reason: String },
}

/// Platform data directory for voxrelay (e.g. `~/.local/share/voxrelay`).
///
/// Falls back to a relative `.voxrelay` directory on platforms without one.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir().map_or_else(
        || PathBuf::from(format!(".{APP_DIR_NAME}")),
        |dir| dir.join(APP_DIR_NAME),
    )
}

/// Create `path` (and parents) if missing, then verify it is writable.
pub fn ensure_directory(path: &Path) -> Result<(), PathError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(PathError::NotADirectory(path.to_path_buf()));
        }
    } else {
        fs::create_dir_all(path).map_err(|e| PathError::CreateFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    verify_writable(path)
}

/// Verify a directory is writable by creating and removing a probe file.
pub fn verify_writable(path: &Path) -> Result<(), PathError> {
    let probe = path.join(".voxrelay_write_test");
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&probe)
        .map_err(|e| PathError::NotWritable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let _ = fs::remove_file(&probe);
    Ok(())
}
