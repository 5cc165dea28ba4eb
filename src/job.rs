//! The job envelope passed between pipeline stages.
//!
//! A `Job` is published to a named queue as a JSON map. Payload fields carry
//! filesystem locations, never file content; audio bytes stay on the shared
//! volume. A job is immutable once published: a stage that needs to extend it
//! builds a new `Job` with copied-and-extended fields and publishes that.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// What kind of work a job describes, and which stage consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// A single audio file ready for stem separation.
    Track,
    /// A folder of audio files; expanded into per-track work by the splitter.
    Album,
    /// Separated stems ready for transcoding.
    Convert,
    /// Transcoded stems ready for mixing.
    Combine,
    /// A finished file awaiting its stored tags.
    Metadata,
    /// A list of temporary artifacts to reclaim.
    Cleanup,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::Track => "track",
            JobKind::Album => "album",
            JobKind::Convert => "convert",
            JobKind::Combine => "combine",
            JobKind::Metadata => "metadata",
            JobKind::Cleanup => "cleanup",
        };
        write!(f, "{}", s)
    }
}

/// Where a job currently sits in the pipeline.
///
/// Each worker sets this before republishing, so the per-job state machine is
/// readable straight off the wire instead of being inferred from which fields
/// happen to be populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Detected,
    Deduplicated,
    Split,
    Converted,
    Combined,
    MetadataApplied,
    CleanedUp,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Detected => "detected",
            PipelineStage::Deduplicated => "deduplicated",
            PipelineStage::Split => "split",
            PipelineStage::Converted => "converted",
            PipelineStage::Combined => "combined",
            PipelineStage::MetadataApplied => "metadata_applied",
            PipelineStage::CleanedUp => "cleaned_up",
        };
        write!(f, "{}", s)
    }
}

/// The message envelope flowing on the broker.
///
/// `job_id` equals `metadata_key` when known, otherwise a content hash of the
/// source path; it is unique per logical source file and is what the dedup
/// gate checks. All optional fields tolerate absence on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub job_id: String,

    #[serde(rename = "type")]
    pub kind: JobKind,

    #[serde(default)]
    pub stage: PipelineStage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_folder: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stems: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_key: Option<String>,

    /// Paths accumulated by upstream stages for the terminal cleanup stage.
    /// Append-only: stages extend the list, never remove from it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_paths: Vec<PathBuf>,
}

impl Job {
    /// Build a bare job of the given kind with everything else empty.
    pub fn new(kind: JobKind) -> Self {
        Job {
            job_id: String::new(),
            kind,
            stage: PipelineStage::Detected,
            path: None,
            source_folder: None,
            stems: Vec::new(),
            original_filename: None,
            original_file: None,
            final_file: None,
            canonical_name: None,
            metadata_key: None,
            cleanup_paths: Vec::new(),
        }
    }

    /// An ingestion job for a single audio file keyed by its content hash.
    pub fn track(path: PathBuf, metadata_key: String) -> Self {
        let original_filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string());
        Job {
            job_id: metadata_key.clone(),
            stage: PipelineStage::Deduplicated,
            path: Some(path),
            original_filename,
            metadata_key: Some(metadata_key),
            ..Job::new(JobKind::Track)
        }
    }

    /// An ingestion job for a folder of audio files.
    pub fn album(path: PathBuf, job_id: String) -> Self {
        Job {
            job_id,
            stage: PipelineStage::Deduplicated,
            path: Some(path),
            ..Job::new(JobKind::Album)
        }
    }

    /// Serialize the job for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize a job from a wire body. Failure marks the message poison.
    pub fn parse(body: &str) -> serde_json::Result<Job> {
        serde_json::from_str(body)
    }
}
