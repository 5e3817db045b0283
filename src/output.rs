//! Where downloaded artifacts end up.
//!
//! The "save-as" step is behind [`ArtifactSink`] so the retriever does not
//! care whether bytes land in a directory, an in-memory buffer, or a
//! browser-style download prompt. [`DirectorySink`] is the default.

use crate::error::SaveError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::info;

/// Persists a retrieved artifact under its derived name.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Save `bytes` as `file_name`; returns where it went.
    async fn save(&self, file_name: &str, bytes: Bytes) -> Result<PathBuf, SaveError>;
}

/// Writes artifacts into a directory with an atomic temp-file + rename.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(&self, file_name: &str, bytes: Bytes) -> Result<PathBuf, SaveError> {
        // The name comes from user input; keep it inside `dir`.
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name == "."
            || file_name == ".."
        {
            return Err(SaveError::UnsafeName(file_name.to_string()));
        }

        let path = self.dir.join(file_name);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SaveError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        let tmp_path = self.dir.join(format!(".{file_name}.part"));
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| SaveError::WriteFailed {
                path: path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| SaveError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        info!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}
