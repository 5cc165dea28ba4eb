//! Apply-metadata stage: tagging the final file.
//!
//! Fetches the metadata record stored at ingestion and writes every field
//! into the final file's tags, then forwards the job's cleanup-path list
//! unchanged to the cleanup queue. Tagging problems are logged but never
//! block the cleanup handoff.

use crate::broker::QueueName;
use crate::job::{Job, JobKind, PipelineStage};
use crate::media::MediaOps;
use crate::state::PipelineState;
use crate::worker::{JobHandler, Outbound};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct ApplyMetadataStage {
    state: Arc<dyn PipelineState>,
    media: Arc<dyn MediaOps>,
}

impl ApplyMetadataStage {
    pub fn new(state: Arc<dyn PipelineState>, media: Arc<dyn MediaOps>) -> Self {
        Self { state, media }
    }
}

#[async_trait]
impl JobHandler for ApplyMetadataStage {
    fn queue(&self) -> QueueName {
        QueueName::Metadata
    }

    async fn handle(&self, job: Job) -> Result<Vec<Outbound>> {
        match (job.final_file.as_deref(), job.metadata_key.as_deref()) {
            (Some(final_file), Some(key)) => {
                let metadata = self.state.get_metadata(key)?;
                if metadata.is_empty() {
                    warn!("No stored metadata found for key {}", key);
                } else {
                    match self.media.write_tags(final_file, &metadata).await {
                        Ok(()) => {
                            info!("Applied stored metadata to {}", final_file.display())
                        }
                        Err(e) => error!(
                            "Error applying metadata to {}: {}",
                            final_file.display(),
                            e
                        ),
                    }
                }
            }
            _ => warn!(
                "Metadata job {} missing final file or metadata key; skipping tag write",
                job.job_id
            ),
        }

        // The cleanup-path list is forwarded unchanged.
        let cleanup_job = Job {
            job_id: job.job_id.clone(),
            stage: PipelineStage::MetadataApplied,
            original_file: job.original_file.clone(),
            final_file: job.final_file.clone(),
            cleanup_paths: job.cleanup_paths.clone(),
            ..Job::new(JobKind::Cleanup)
        };
        Ok(vec![Outbound::new(QueueName::Cleanup, cleanup_job)])
    }
}
