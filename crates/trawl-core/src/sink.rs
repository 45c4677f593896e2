//! Filesystem page sink.

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::traits::PageSink;

/// Writes each page to `<dir>/<prefix>_<resource>[_<hex(page_key)>].json`.
///
/// Page keys are hex-encoded so cursor tokens (which contain `/`, `+`, `=`)
/// are safe as file name components.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
    prefix: String,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, resource_id: &str, page_key: &str) -> PathBuf {
        let file_name = if page_key.is_empty() {
            format!("{}_{}.json", self.prefix, resource_id)
        } else {
            format!(
                "{}_{}_{}.json",
                self.prefix,
                resource_id,
                hex::encode(page_key.as_bytes())
            )
        };
        self.dir.join(file_name)
    }
}

impl PageSink for FileSink {
    async fn save(&self, body: &[u8], resource_id: &str, page_key: &str) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(resource_id, page_key);
        tokio::fs::write(&path, body).await.map_err(|e| {
            AppError::StorageError(format!("Failed to write {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), bytes = body.len(), "Wrote page");
        Ok(())
    }
}
