//! Cleanup stage: reclaiming temporary artifacts.
//!
//! The terminal stage. Every path in the job's cleanup list is removed if
//! present and skipped with a log line if absent. Each removal is attempted
//! independently; one failing path never aborts the remaining ones.

use crate::broker::QueueName;
use crate::job::Job;
use crate::worker::{JobHandler, Outbound};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};

pub struct CleanupStage;

impl CleanupStage {
    pub fn new() -> Self {
        Self
    }

    /// Remove one path if it exists: files unlinked, directories removed
    /// recursively. Idempotent; errors are logged per path.
    async fn cleanup_path(path: &Path) {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(_) => {
                info!("Path {} not found; skipping cleanup", path.display());
                return;
            }
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };

        match result {
            Ok(()) if metadata.is_dir() => info!("Removed folder: {}", path.display()),
            Ok(()) => info!("Removed file: {}", path.display()),
            Err(e) => error!("Error removing path {}: {}", path.display(), e),
        }
    }
}

impl Default for CleanupStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for CleanupStage {
    fn queue(&self) -> QueueName {
        QueueName::Cleanup
    }

    async fn handle(&self, job: Job) -> Result<Vec<Outbound>> {
        if job.cleanup_paths.is_empty() {
            debug!("No cleanup paths in job {}; nothing to do", job.job_id);
            return Ok(Vec::new());
        }

        for path in &job.cleanup_paths {
            Self::cleanup_path(path).await;
        }
        Ok(Vec::new())
    }
}
