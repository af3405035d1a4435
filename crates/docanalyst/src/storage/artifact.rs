//! Staged uploads and their guaranteed release.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::sanitize;

/// Owns the on-disk lifetime of uploaded documents.
pub trait ArtifactStore: Send + Sync {
    /// Persists `content` under a fresh, unique path. `filename` is the
    /// original upload name; only its extension is kept.
    fn stage(&self, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError>;

    /// Best-effort delete. Never fails; problems are logged and swallowed.
    fn release(&self, path: &Path);
}

/// Artifact store writing into a single local directory.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    directory: PathBuf,
}

impl FileArtifactStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    fn ensure_directory(&self) -> Result<(), StorageError> {
        if !self.directory.exists() {
            std::fs::create_dir_all(&self.directory).map_err(|e| {
                StorageError::CreateDirectory {
                    path: self.directory.clone(),
                    source: e,
                }
            })?;
        }
        Ok(())
    }
}

fn staged_name(filename: &str) -> String {
    let id = uuid::Uuid::new_v4();
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());

    match extension {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

/// Runs `write` and removes the partly written file at `path` if it fails.
fn write_or_discard(
    path: &Path,
    write: impl FnOnce() -> std::io::Result<()>,
) -> Result<(), StorageError> {
    write().map_err(|e| {
        if let Err(cleanup) = std::fs::remove_file(path) {
            tracing::warn!(
                artifact = %sanitize::redact_path(path),
                "Failed to remove partial artifact: {}",
                cleanup
            );
        }
        StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

impl ArtifactStore for FileArtifactStore {
    fn stage(&self, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.ensure_directory()?;

        let path = self.directory.join(staged_name(filename));

        // create_new fails instead of clobbering an existing artifact
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        write_or_discard(&path, || {
            file.write_all(content)?;
            file.sync_all()
        })?;

        tracing::debug!(
            artifact = %sanitize::redact_path(&path),
            bytes = content.len(),
            "Staged upload"
        );
        Ok(path)
    }

    fn release(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(artifact = %sanitize::redact_path(path), "Released artifact");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    artifact = %sanitize::redact_path(path),
                    "Artifact already gone"
                );
            }
            Err(e) => {
                tracing::warn!(
                    artifact = %sanitize::redact_path(path),
                    "Failed to release artifact: {}",
                    e
                );
            }
        }
    }
}
