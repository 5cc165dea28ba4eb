//! Ingestion of stable downloads into the pipeline.
//!
//! A stable file is renamed into the canonical originals store, hashed at
//! its final location, its tags persisted, and a `track` job submitted
//! through the dedup gate. A stable folder is expanded one level into
//! per-track ingestion and then removed. A `.job` sidecar file is a
//! pre-formed job submitted through the same gate.

use super::stability::{wait_for_stable_dir, wait_for_stable_file};
use crate::broker::{QueueName, SqliteBroker};
use crate::hashing::content_hash;
use crate::job::Job;
use crate::media::MediaOps;
use crate::state::PipelineState;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Audio extensions the watcher picks up.
const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "m4a", "ogg"];

/// What happened to one submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Published and marked in the dedup index.
    Submitted,
    /// The dedup gate had already seen this job id.
    Duplicate,
    /// Never stabilized (e.g. disappeared mid-poll); nothing submitted.
    Skipped,
}

/// Stability polling knobs.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Poll interval for single-file stability.
    pub file_poll: Duration,
    /// Poll interval for directory aggregate size.
    pub dir_check_interval: Duration,
    /// How long a directory's size must hold still.
    pub dir_min_stable: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            file_poll: Duration::from_secs(10),
            dir_check_interval: Duration::from_secs(2),
            dir_min_stable: Duration::from_secs(10),
        }
    }
}

/// Performs ingestion: identity, metadata persistence, and the dedup-gated
/// publish of the first pipeline job.
pub struct Ingestor {
    broker: SqliteBroker,
    state: Arc<dyn PipelineState>,
    media: Arc<dyn MediaOps>,
    inbox_dir: PathBuf,
    originals_dir: PathBuf,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(
        broker: SqliteBroker,
        state: Arc<dyn PipelineState>,
        media: Arc<dyn MediaOps>,
        inbox_dir: PathBuf,
        originals_dir: PathBuf,
        settings: IngestSettings,
    ) -> Self {
        Self {
            broker,
            state,
            media,
            inbox_dir,
            originals_dir,
            settings,
        }
    }

    /// Whether a filename looks like audio the pipeline handles.
    pub fn is_supported_audio(filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Ingest one newly detected file.
    pub async fn process_file(&self, path: &Path) -> Result<IngestOutcome> {
        info!("Detected new file: {}", path.display());
        if !wait_for_stable_file(path, self.settings.file_poll).await {
            warn!(
                "File {} disappeared before stabilizing; skipping",
                path.display()
            );
            return Ok(IngestOutcome::Skipped);
        }

        tokio::fs::create_dir_all(&self.originals_dir).await?;

        // Canonical name from embedded tags when available, else the
        // original filename.
        let canonical_name = self.canonical_name(path).await;
        let target = self.originals_dir.join(&canonical_name);

        // A failed move is non-fatal: the file is processed in place.
        let final_path = match move_file(path, &target).await {
            Ok(()) => {
                info!("Moved file to originals: {}", target.display());
                target
            }
            Err(e) => {
                error!(
                    "Error moving {} to originals: {:#}; processing in place",
                    path.display(),
                    e
                );
                path.to_path_buf()
            }
        };

        // Identity is the content hash of the final, post-move location.
        let file_hash = content_hash(&final_path)
            .with_context(|| format!("Failed to hash {}", final_path.display()))?;

        // Tag extraction failure is non-fatal; the job proceeds without a
        // stored metadata record.
        match self.media.read_tags(&final_path).await {
            Ok(tags) if !tags.is_empty() => {
                self.state.put_metadata(&file_hash, &tags)?;
                info!("Stored metadata under key {}", file_hash);
            }
            Ok(_) => {}
            Err(e) => warn!(
                "Failed to extract metadata from {}: {}",
                final_path.display(),
                e
            ),
        }

        self.submit(Job::track(final_path, file_hash))
    }

    /// Ingest one newly detected folder: wait for the whole download to
    /// settle, emit one track job per contained audio file (one level deep),
    /// then remove the emptied folder.
    pub async fn process_directory(&self, path: &Path) -> Result<Vec<IngestOutcome>> {
        info!("Detected new folder: {}", path.display());
        if !wait_for_stable_dir(
            path,
            self.settings.dir_check_interval,
            self.settings.dir_min_stable,
        )
        .await
        {
            warn!(
                "Folder {} disappeared before stabilizing; skipping",
                path.display()
            );
            return Ok(vec![IngestOutcome::Skipped]);
        }

        let mut outcomes = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if entry_path.is_file() && Self::is_supported_audio(name) {
                match self.process_file(&entry_path).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => error!("Failed to ingest {}: {:#}", entry_path.display(), e),
                }
            }
        }

        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => info!("Removed original folder: {}", path.display()),
            Err(e) => error!("Error removing folder {}: {}", path.display(), e),
        }

        Ok(outcomes)
    }

    /// Submit a pre-formed job dropped as a `.job` sidecar file.
    pub async fn submit_sidecar(&self, sidecar: &Path) -> Result<IngestOutcome> {
        let body = tokio::fs::read_to_string(sidecar).await?;
        let outcome = match Job::parse(&body) {
            Ok(mut job) => {
                if job.job_id.is_empty() {
                    job.job_id = self.derive_job_id(&job)?;
                }
                self.submit(job)?
            }
            Err(e) => {
                warn!("Dropping malformed sidecar {}: {}", sidecar.display(), e);
                IngestOutcome::Skipped
            }
        };
        // Consumed either way so the scan loop does not see it again.
        tokio::fs::remove_file(sidecar).await?;
        Ok(outcome)
    }

    /// Submit a job through the dedup gate.
    ///
    /// The dedup entry is marked only after the publish succeeds, so a crash
    /// in between yields a redelivered-then-deduplicated job instead of a
    /// submitted-but-never-queued one.
    pub fn submit(&self, job: Job) -> Result<IngestOutcome> {
        if self.state.is_duplicate(&job.job_id)? {
            info!(
                "Job already submitted (job_id={}); skipping duplicate",
                job.job_id
            );
            return Ok(IngestOutcome::Duplicate);
        }

        let body = job.to_json()?;
        self.broker.publish(QueueName::Ingest, &body)?;
        self.state.mark_submitted(&job.job_id)?;
        info!("Sent {} job {} to {}", job.kind, job.job_id, QueueName::Ingest);
        Ok(IngestOutcome::Submitted)
    }

    /// `"{title} - {artist}.{ext}"` when both tags read, else the original
    /// filename.
    async fn canonical_name(&self, path: &Path) -> String {
        let fallback = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let tags = match self.media.read_tags(path).await {
            Ok(tags) => tags,
            Err(_) => return fallback,
        };
        let (Some(title), Some(artist)) = (tags.get("title"), tags.get("artist")) else {
            return fallback;
        };
        let (title, artist) = (title.trim(), artist.trim());
        if title.is_empty() || artist.is_empty() {
            return fallback;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp3");
        format!("{} - {}.{}", title, artist, ext)
    }

    /// job_id for a sidecar job: the metadata key when present, else the
    /// content hash of the job's source path.
    fn derive_job_id(&self, job: &Job) -> Result<String> {
        if let Some(key) = job.metadata_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        let path = job
            .path
            .as_ref()
            .context("Sidecar job has neither metadata_key nor path")?;
        // Resolve relative sidecar paths against the inbox.
        let path = if path.is_absolute() {
            path.clone()
        } else {
            self.inbox_dir.join(path)
        };
        content_hash(&path).with_context(|| format!("Failed to hash {}", path.display()))
    }
}

/// Rename, falling back to copy-and-delete for cross-device moves.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
