//! Convert stage: per-stem transcoding.
//!
//! Transcodes each separated stem into the `converted/` subfolder of the
//! stem working area. A stem that fails to transcode is skipped; when no
//! stem transcodes successfully, no follow-on job is emitted.

use crate::broker::QueueName;
use crate::job::{Job, JobKind, PipelineStage};
use crate::media::MediaOps;
use crate::worker::{JobHandler, Outbound};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Subfolder of the stem working area holding transcoded stems.
pub const CONVERTED_SUBFOLDER: &str = "converted";

pub struct ConvertStage {
    media: Arc<dyn MediaOps>,
}

impl ConvertStage {
    pub fn new(media: Arc<dyn MediaOps>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl JobHandler for ConvertStage {
    fn queue(&self) -> QueueName {
        QueueName::Convert
    }

    async fn handle(&self, job: Job) -> Result<Vec<Outbound>> {
        let Some(source_folder) = job.source_folder.as_deref() else {
            warn!("Convert job {} has no source folder; dropping", job.job_id);
            return Ok(Vec::new());
        };

        let converted_dir = source_folder.join(CONVERTED_SUBFOLDER);
        tokio::fs::create_dir_all(&converted_dir).await?;

        let mut converted = Vec::new();
        for stem in &job.stems {
            let input = source_folder.join(stem);
            let output_name = Path::new(stem)
                .with_extension("mp3")
                .to_string_lossy()
                .to_string();
            let output = converted_dir.join(&output_name);

            match self.media.transcode(&input, &output).await {
                Ok(()) => {
                    info!("Converted {} -> {}", input.display(), output.display());
                    converted.push(output_name);
                }
                Err(e) => {
                    // Isolated per stem; the rest still proceed.
                    warn!("Error converting {}: {}", input.display(), e);
                }
            }
        }

        if converted.is_empty() {
            warn!(
                "No stems were successfully converted for {}; not emitting combine job",
                job.job_id
            );
            return Ok(Vec::new());
        }

        let follow_on = Job {
            job_id: job.job_id.clone(),
            stage: PipelineStage::Converted,
            source_folder: Some(converted_dir),
            stems: converted,
            original_filename: job.original_filename.clone(),
            original_file: job.original_file.clone(),
            metadata_key: job.metadata_key.clone(),
            cleanup_paths: job.cleanup_paths.clone(),
            ..Job::new(JobKind::Combine)
        };
        Ok(vec![Outbound::new(QueueName::Combine, follow_on)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaError;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Transcoder fake that fails for scripted stem names.
    struct FakeTranscoder {
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl MediaOps for FakeTranscoder {
        async fn separate(&self, _: &Path, _: &Path) -> Result<(), MediaError> {
            unreachable!()
        }
        async fn transcode(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
            let name = input.file_name().unwrap().to_str().unwrap();
            if self.failing.contains(&name) {
                return Err(MediaError::TranscodeFailed(format!("scripted: {}", name)));
            }
            std::fs::write(output, b"mp3 bytes")?;
            Ok(())
        }
        async fn mix(&self, _: &[PathBuf], _: &Path) -> Result<(), MediaError> {
            unreachable!()
        }
        async fn read_tags(&self, _: &Path) -> Result<HashMap<String, String>, MediaError> {
            unreachable!()
        }
        async fn write_tags(&self, _: &Path, _: &HashMap<String, String>) -> Result<(), MediaError> {
            unreachable!()
        }
    }

    fn convert_job(source_folder: PathBuf, stems: &[&str]) -> Job {
        Job {
            job_id: "job-1".to_string(),
            stage: PipelineStage::Split,
            source_folder: Some(source_folder),
            stems: stems.iter().map(|s| s.to_string()).collect(),
            original_filename: Some("song.mp3".to_string()),
            metadata_key: Some("key-1".to_string()),
            ..Job::new(JobKind::Convert)
        }
    }

    #[tokio::test]
    async fn test_all_stems_converted() {
        let dir = TempDir::new().unwrap();
        let stage = ConvertStage::new(Arc::new(FakeTranscoder { failing: vec![] }));

        let job = convert_job(dir.path().to_path_buf(), &["drums.wav", "bass.wav"]);
        let outbound = stage.handle(job).await.unwrap();

        assert_eq!(outbound.len(), 1);
        let out = &outbound[0];
        assert_eq!(out.queue, QueueName::Combine);
        assert_eq!(out.job.kind, JobKind::Combine);
        assert_eq!(out.job.stage, PipelineStage::Converted);
        assert_eq!(out.job.stems, vec!["drums.mp3", "bass.mp3"]);
        assert_eq!(
            out.job.source_folder.as_deref(),
            Some(dir.path().join("converted").as_path())
        );
        assert!(dir.path().join("converted/drums.mp3").exists());
    }

    #[tokio::test]
    async fn test_partial_failure_skips_failed_stem() {
        let dir = TempDir::new().unwrap();
        let stage = ConvertStage::new(Arc::new(FakeTranscoder {
            failing: vec!["bass.wav"],
        }));

        let job = convert_job(
            dir.path().to_path_buf(),
            &["drums.wav", "bass.wav", "piano.wav"],
        );
        let outbound = stage.handle(job).await.unwrap();

        // One of three failed: exactly the other two proceed.
        assert_eq!(outbound[0].job.stems, vec!["drums.mp3", "piano.mp3"]);
    }

    #[tokio::test]
    async fn test_total_failure_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let stage = ConvertStage::new(Arc::new(FakeTranscoder {
            failing: vec!["drums.wav", "bass.wav", "piano.wav"],
        }));

        let job = convert_job(
            dir.path().to_path_buf(),
            &["drums.wav", "bass.wav", "piano.wav"],
        );
        let outbound = stage.handle(job).await.unwrap();
        assert!(outbound.is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_folder_dropped() {
        let stage = ConvertStage::new(Arc::new(FakeTranscoder { failing: vec![] }));
        let mut job = convert_job(PathBuf::new(), &[]);
        job.source_folder = None;
        assert!(stage.handle(job).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_paths_carried_through() {
        let dir = TempDir::new().unwrap();
        let stage = ConvertStage::new(Arc::new(FakeTranscoder { failing: vec![] }));

        let mut job = convert_job(dir.path().to_path_buf(), &["drums.wav"]);
        job.cleanup_paths = vec![PathBuf::from("/downloads/song.mp3")];

        let outbound = stage.handle(job).await.unwrap();
        assert_eq!(
            outbound[0].job.cleanup_paths,
            vec![PathBuf::from("/downloads/song.mp3")]
        );
    }
}
