use super::TransferSink;
use crate::model::sanitize_file_name;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes payloads as files inside one directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    overwrite: bool,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overwrite: false,
        }
    }

    /// Replace files that already exist instead of leaving them untouched.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for `name`; never escapes `root`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(sanitize_file_name(name))
    }
}

#[async_trait]
impl TransferSink for DirectorySink {
    async fn persist(&self, name: &str, bytes: &[u8]) -> Result<(), String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| format!("failed to create {}: {}", self.root.display(), e))?;

        let path = self.path_for(name);
        if !self.overwrite {
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| format!("failed to check {}: {}", path.display(), e))?;
            if exists {
                debug!(path = %path.display(), "already present; skipping");
                return Ok(());
            }
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }
}
