//! Combine stage: mixing stems into the final instrumental.
//!
//! Mixes every converted stem into one output file named from the stored
//! metadata record, assembles the cleanup-path list for the downstream
//! stages, and hands the job to the metadata and cleanup queues. The input
//! message is acked as soon as the mix is computed, before the follow-on
//! publishes — an intentional trade of a small loss window for not blocking
//! the next message on two additional publishes.

use super::convert::CONVERTED_SUBFOLDER;
use crate::broker::QueueName;
use crate::job::{Job, JobKind, PipelineStage};
use crate::media::MediaOps;
use crate::state::PipelineState;
use crate::worker::{AckMode, JobHandler, Outbound};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct CombineStage {
    state: Arc<dyn PipelineState>,
    media: Arc<dyn MediaOps>,
    /// Final instrumentals are placed here.
    output_dir: PathBuf,
    /// The downloads inbox, checked for a leftover duplicate of the source.
    inbox_dir: PathBuf,
    /// Root of the per-track stem working folders.
    stems_dir: PathBuf,
}

impl CombineStage {
    pub fn new(
        state: Arc<dyn PipelineState>,
        media: Arc<dyn MediaOps>,
        output_dir: PathBuf,
        inbox_dir: PathBuf,
        stems_dir: PathBuf,
    ) -> Self {
        Self {
            state,
            media,
            output_dir,
            inbox_dir,
            stems_dir,
        }
    }

    /// `"{title} - {artist} - (Instrumental).mp3"` when the stored record
    /// has both fields; otherwise a name derived from the original filename.
    fn canonical_filename(
        metadata: &HashMap<String, String>,
        original_filename: &str,
    ) -> String {
        let title = metadata.get("title").map(|s| s.trim()).unwrap_or("");
        let artist = metadata.get("artist").map(|s| s.trim()).unwrap_or("");
        if !title.is_empty() && !artist.is_empty() {
            return format!("{} - {} - (Instrumental).mp3", title, artist);
        }
        let base = Path::new(original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        format!("{}_combined.mp3", base)
    }

    /// The four cleanup-path candidates for a finished track. Some may not
    /// exist; existence is checked at cleanup time, not here.
    fn cleanup_candidates(&self, cleanup_target: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(filename) = cleanup_target.file_name() {
            paths.push(self.inbox_dir.join(filename));
        }
        paths.push(cleanup_target.to_path_buf());
        let base = cleanup_target
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");
        let work_folder = self.stems_dir.join(base);
        paths.push(work_folder.clone());
        paths.push(work_folder.join(CONVERTED_SUBFOLDER));
        paths
    }
}

#[async_trait]
impl JobHandler for CombineStage {
    fn queue(&self) -> QueueName {
        QueueName::Combine
    }

    /// Ack after the mix, before the follow-on publishes.
    fn ack_mode(&self) -> AckMode {
        AckMode::BeforePublish
    }

    async fn handle(&self, job: Job) -> Result<Vec<Outbound>> {
        let Some(source_folder) = job.source_folder.as_deref() else {
            warn!("Combine job {} has no source folder; dropping", job.job_id);
            return Ok(Vec::new());
        };
        if job.stems.is_empty() {
            warn!("Combine job {} has no stems; dropping", job.job_id);
            return Ok(Vec::new());
        }

        let metadata = match job.metadata_key.as_deref() {
            Some(key) => self.state.get_metadata(key)?,
            None => HashMap::new(),
        };
        let original_filename = job.original_filename.as_deref().unwrap_or("output.mp3");
        let canonical_name = Self::canonical_filename(&metadata, original_filename);
        let final_output = self.output_dir.join(&canonical_name);

        let inputs: Vec<PathBuf> = job.stems.iter().map(|s| source_folder.join(s)).collect();
        self.media
            .mix(&inputs, &final_output)
            .await
            .with_context(|| format!("Failed to combine stems for {}", job.job_id))?;
        info!(
            "Combined instrumental created at: {}",
            final_output.display()
        );

        // The original source is the cleanup target; the whole-album folder
        // variant was already expanded to per-file targets at ingestion.
        let cleanup_target = job.original_file.clone().or_else(|| job.path.clone());
        let mut cleanup_paths = job.cleanup_paths.clone();
        match &cleanup_target {
            Some(target) => cleanup_paths.extend(self.cleanup_candidates(target)),
            None => warn!("Combine job {} has no cleanup target", job.job_id),
        }

        let metadata_job = Job {
            job_id: job.job_id.clone(),
            stage: PipelineStage::Combined,
            original_filename: Some(original_filename.to_string()),
            original_file: cleanup_target.clone(),
            final_file: Some(final_output.clone()),
            canonical_name: Some(canonical_name),
            metadata_key: job.metadata_key.clone(),
            cleanup_paths: cleanup_paths.clone(),
            ..Job::new(JobKind::Metadata)
        };

        let cleanup_job = Job {
            job_id: job.job_id.clone(),
            stage: PipelineStage::Combined,
            original_file: cleanup_target,
            final_file: Some(final_output),
            cleanup_paths,
            ..Job::new(JobKind::Cleanup)
        };

        Ok(vec![
            Outbound::new(QueueName::Metadata, metadata_job),
            Outbound::new(QueueName::Cleanup, cleanup_job),
        ])
    }
}
