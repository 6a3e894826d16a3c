//! Export manifest describing what a run collected and transferred.
use crate::model::MediaItem;
use crate::transfer::{PersistRunResult, TransferRunResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub blog: String,
    pub listing: String,
    pub total_source_count: Option<u64>,
    pub items: Vec<MediaItem>,
    pub downloaded: usize,
    pub saved: usize,
    pub cancelled: bool,
    pub failures: Vec<ManifestFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFailure {
    pub target_name: String,
    pub stage: String,
    pub reason: String,
}

impl Manifest {
    pub fn new(
        blog: &str,
        listing: &str,
        items: Vec<MediaItem>,
        total_source_count: Option<u64>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            blog: blog.to_string(),
            listing: listing.to_string(),
            total_source_count,
            items,
            downloaded: 0,
            saved: 0,
            cancelled: false,
            failures: Vec::new(),
        }
    }

    pub fn record_transfer(&mut self, run: &TransferRunResult) {
        self.downloaded = run.succeeded;
        self.cancelled |= run.cancelled;
        self.failures.extend(run.errors.iter().map(|e| ManifestFailure {
            target_name: e.target_name.clone(),
            stage: "download".into(),
            reason: e.reason.clone(),
        }));
    }

    pub fn record_persist(&mut self, run: &PersistRunResult) {
        self.saved = run.saved;
        self.cancelled |= run.cancelled;
        self.failures.extend(run.errors.iter().map(|e| ManifestFailure {
            target_name: e.target_name.clone(),
            stage: "save".into(),
            reason: e.reason.clone(),
        }));
    }

    pub async fn write(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(MANIFEST_FILE);
        let raw = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, raw)
            .await
            .with_context(|| format!("failed to write manifest: {}", path.display()))?;
        Ok(path)
    }
}
