//! Persisted pagination state so a walk can continue in a later run.
use crate::model::MediaItem;
use crate::pagination::PaginationState;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the next run picks up: the cursor plus any images a truncated run
/// collected but did not return.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumePoint {
    pub state: PaginationState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<MediaItem>,
}

/// `{data_dir}/state/{blog}-{listing}.json`
pub fn state_path(data_dir: &Path, blog: &str, listing: &str) -> PathBuf {
    let name = crate::model::sanitize_file_name(&format!("{}-{}.json", blog, listing));
    data_dir.join("state").join(name)
}

/// Load a saved resume point. A missing file is `Ok(None)`; a file whose
/// cursor fields are inconsistent is an error.
pub async fn load_state(path: &Path) -> Result<Option<ResumePoint>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read state: {}", path.display()))
        }
    };
    let point = serde_json::from_str(&raw)
        .with_context(|| format!("invalid pagination state in {}", path.display()))?;
    Ok(Some(point))
}

pub async fn save_state(path: &Path, point: &ResumePoint) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(point)?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("failed to write state: {}", path.display()))
}
