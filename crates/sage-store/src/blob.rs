//! Filesystem blob store for user uploads.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use sage_core::{BlobStore, Error, Result};

/// Reads uploaded files beneath a root directory.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Build from `FILE_STORAGE_PATH`.
    pub fn from_env() -> Self {
        let path = std::env::var("FILE_STORAGE_PATH")
            .unwrap_or_else(|_| sage_core::defaults::FILE_STORAGE_PATH.to_string());
        Self::new(path)
    }

    /// Resolve a stored path, rejecting absolute paths and `..` segments.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || !safe {
            return Err(Error::InvalidInput(format!(
                "Invalid storage path: {}",
                path
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn read_file_buffer(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        debug!(storage_path = %path, full_path = %full_path.display(), "blob_store: read");
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("file {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
