//! Split stage: stem separation.
//!
//! Consumes `track` and `album` jobs from the initial queue. Each track is
//! copied into the originals store, separated into stems, and handed to the
//! convert stage. Already-processed sources are recognized through the
//! durable dedup store keyed by content hash, so the guard survives restarts
//! and coordinates across splitter instances.

use crate::broker::QueueName;
use crate::hashing::content_hash;
use crate::job::{Job, JobKind, PipelineStage};
use crate::media::MediaOps;
use crate::state::PipelineState;
use crate::worker::{JobHandler, Outbound};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The separator's vocal output; everything else is a usable stem.
const VOCALS_STEM: &str = "vocals.wav";

/// Namespace for the splitter's already-processed marker in the dedup store.
fn processed_marker(metadata_key: &str) -> String {
    format!("split:{}", metadata_key)
}

pub struct SplitStage {
    state: Arc<dyn PipelineState>,
    media: Arc<dyn MediaOps>,
    originals_dir: PathBuf,
    stems_dir: PathBuf,
}

impl SplitStage {
    pub fn new(
        state: Arc<dyn PipelineState>,
        media: Arc<dyn MediaOps>,
        originals_dir: PathBuf,
        stems_dir: PathBuf,
    ) -> Self {
        Self {
            state,
            media,
            originals_dir,
            stems_dir,
        }
    }

    async fn process_track(
        &self,
        path: &Path,
        metadata_key: Option<&str>,
    ) -> Result<Option<Outbound>> {
        info!("Processing track: {}", path.display());

        let original = self.copy_to_originals(path).await;

        let metadata_key = match metadata_key.filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => {
                let hash = content_hash(&original)
                    .with_context(|| format!("Failed to hash {}", original.display()))?;
                info!("Recomputed metadata_key: {}", hash);
                hash
            }
        };

        let marker = processed_marker(&metadata_key);
        if self.state.is_duplicate(&marker)? {
            info!("Track {} already processed; skipping", path.display());
            return Ok(None);
        }
        self.state.mark_submitted(&marker)?;

        self.media
            .separate(&original, &self.stems_dir)
            .await
            .with_context(|| format!("Stem separation failed for {}", original.display()))?;

        let original_filename = original
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let base = Path::new(&original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");
        let source_folder = self.stems_dir.join(base);

        let stems = self.usable_stems(&source_folder).await;
        if stems.is_empty() {
            // A dead end, not a failure: the message is still acked.
            warn!("No usable stems found for {}", path.display());
            return Ok(None);
        }

        let job = Job {
            job_id: metadata_key.clone(),
            stage: PipelineStage::Split,
            source_folder: Some(source_folder),
            stems,
            original_filename: Some(original_filename),
            original_file: Some(original),
            metadata_key: Some(metadata_key),
            ..Job::new(JobKind::Convert)
        };
        Ok(Some(Outbound::new(QueueName::Convert, job)))
    }

    /// Keep a copy of the untouched source in the flat originals store.
    /// Copy failure is non-fatal: the job proceeds on the incoming path.
    async fn copy_to_originals(&self, path: &Path) -> PathBuf {
        let Some(filename) = path.file_name() else {
            return path.to_path_buf();
        };
        let destination = self.originals_dir.join(filename);
        if destination == path {
            return destination;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.originals_dir).await {
            error!("Error creating originals dir: {}", e);
            return path.to_path_buf();
        }
        match tokio::fs::copy(path, &destination).await {
            Ok(_) => {
                info!("Copied original file to: {}", destination.display());
                destination
            }
            Err(e) => {
                error!("Error copying original file: {}", e);
                path.to_path_buf()
            }
        }
    }

    /// WAV stems produced by the separator, excluding the vocal output.
    /// A missing or unreadable stem folder yields an empty list.
    async fn usable_stems(&self, source_folder: &Path) -> Vec<String> {
        let mut stems = Vec::new();
        let mut entries = match tokio::fs::read_dir(source_folder).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(
                    "Error reading stems from {}: {}",
                    source_folder.display(),
                    e
                );
                return stems;
            }
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if let Some(name) = entry.file_name().to_str() {
                        if name.ends_with(".wav") && name != VOCALS_STEM {
                            stems.push(name.to_string());
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error listing stems: {}", e);
                    break;
                }
            }
        }
        stems.sort();
        stems
    }
}

#[async_trait]
impl JobHandler for SplitStage {
    fn queue(&self) -> QueueName {
        QueueName::Ingest
    }

    async fn handle(&self, job: Job) -> Result<Vec<Outbound>> {
        let metadata_key = job.metadata_key.as_deref();
        match (job.kind, job.path.as_deref()) {
            (JobKind::Track, Some(path)) if path.is_file() => Ok(self
                .process_track(path, metadata_key)
                .await?
                .into_iter()
                .collect()),
            (JobKind::Album, Some(path)) if path.is_dir() => {
                let mut outbound = Vec::new();
                let mut entries = tokio::fs::read_dir(path).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let entry_path = entry.path();
                    let is_audio = entry_path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.to_lowercase().ends_with(".mp3"))
                        .unwrap_or(false);
                    if entry_path.is_file() && is_audio {
                        if let Some(out) = self.process_track(&entry_path, metadata_key).await? {
                            outbound.push(out);
                        }
                    }
                }
                Ok(outbound)
            }
            (JobKind::Album, Some(path)) if path.is_file() => {
                info!(
                    "Album job received as file; treating as track: {}",
                    path.display()
                );
                Ok(self
                    .process_track(path, metadata_key)
                    .await?
                    .into_iter()
                    .collect())
            }
            _ => {
                warn!(
                    "Unknown or invalid job type or path: {} ({:?})",
                    job.kind, job.path
                );
                Ok(Vec::new())
            }
        }
    }
}
