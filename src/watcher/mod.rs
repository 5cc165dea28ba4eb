//! The ingestion stage: watches the downloads inbox and feeds the pipeline.
//!
//! The watcher scans the inbox on a fixed interval. New audio files and
//! folders are held until stable, given a content-hash identity, and
//! submitted through the dedup gate; `.job` sidecar files are pre-formed
//! jobs submitted through the same gate. The deployed assumption is a
//! single watcher instance (see the dedup gate's non-atomic check-then-set).

mod ingest;
mod stability;

pub use ingest::{IngestOutcome, IngestSettings, Ingestor};
pub use stability::{wait_for_stable_dir, wait_for_stable_file};

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The inbox scan loop.
pub struct Watcher {
    ingestor: Ingestor,
    inbox_dir: std::path::PathBuf,
    scan_interval: Duration,
}

impl Watcher {
    pub fn new(ingestor: Ingestor, inbox_dir: std::path::PathBuf, scan_interval: Duration) -> Self {
        Self {
            ingestor,
            inbox_dir,
            scan_interval,
        }
    }

    /// Scan the inbox until shutdown is requested.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.inbox_dir).await?;
        info!(
            "Watching {} for new files and folders...",
            self.inbox_dir.display()
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.scan_inbox().await {
                error!("Inbox scan failed: {:#}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.scan_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Watcher stopped");
        Ok(())
    }

    /// One pass over the inbox. Entries that ingest successfully leave the
    /// inbox; entries that fail stay and are retried on the next pass.
    async fn scan_inbox(&self) -> anyhow::Result<()> {
        let mut entries = tokio::fs::read_dir(&self.inbox_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            if name.ends_with(".job") {
                if let Err(e) = self.ingestor.submit_sidecar(&path).await {
                    error!("Failed to submit sidecar {}: {:#}", path.display(), e);
                }
            } else if path.is_dir() {
                if let Err(e) = self.ingestor.process_directory(&path).await {
                    error!("Failed to ingest folder {}: {:#}", path.display(), e);
                }
            } else if Ingestor::is_supported_audio(name) {
                if let Err(e) = self.ingestor.process_file(&path).await {
                    error!("Failed to ingest {}: {:#}", path.display(), e);
                }
            } else {
                debug!("Ignoring unsupported inbox entry: {}", path.display());
            }
        }
        Ok(())
    }
}
