//! External media operations.
//!
//! The pipeline core never touches audio content itself; it invokes five
//! opaque operations — stem separation, transcoding, mixing, and tag
//! read/write — and only their call/result contracts matter to the
//! orchestration layer. [`MediaOps`] is that contract; [`FfmpegMedia`] is the
//! production implementation shelling out to the separator CLI and to
//! ffmpeg/ffprobe.

mod mixer;
mod separator;
mod tags;
mod transcode;

pub use separator::SeparatorSettings;
pub use tags::{read_tags, write_tags};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the external media operations.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("stem separation failed: {0}")]
    SeparationFailed(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("mix failed: {0}")]
    MixFailed(String),

    #[error("tag write failed: {0}")]
    TagWriteFailed(String),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The interface the external audio tooling presents to the pipeline.
#[async_trait]
pub trait MediaOps: Send + Sync {
    /// Decompose `input` into stem files under `output_dir`. The separator
    /// writes one folder per input file, one audio file per stem.
    async fn separate(&self, input: &Path, output_dir: &Path) -> Result<(), MediaError>;

    /// Transcode one audio file to `output`.
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), MediaError>;

    /// Mix `inputs` down into a single `output` file.
    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError>;

    /// Read embedded tags as a flat field → value mapping. Files without
    /// readable tags yield an empty mapping.
    async fn read_tags(&self, path: &Path) -> Result<HashMap<String, String>, MediaError>;

    /// Write every field of `fields` into the file's tags.
    async fn write_tags(
        &self,
        path: &Path,
        fields: &HashMap<String, String>,
    ) -> Result<(), MediaError>;
}

/// Production [`MediaOps`] backed by the separator CLI and ffmpeg/ffprobe.
pub struct FfmpegMedia {
    separator: SeparatorSettings,
    /// Target bitrate for stem transcoding (kbps).
    bitrate_kbps: u32,
}

impl FfmpegMedia {
    pub fn new(separator: SeparatorSettings, bitrate_kbps: u32) -> Self {
        Self {
            separator,
            bitrate_kbps,
        }
    }
}

#[async_trait]
impl MediaOps for FfmpegMedia {
    async fn separate(&self, input: &Path, output_dir: &Path) -> Result<(), MediaError> {
        separator::run_separator(&self.separator, input, output_dir).await
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        transcode::transcode_to_mp3(input, output, self.bitrate_kbps).await
    }

    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        mixer::mix_tracks(inputs, output).await
    }

    async fn read_tags(&self, path: &Path) -> Result<HashMap<String, String>, MediaError> {
        tags::read_tags(path).await
    }

    async fn write_tags(
        &self,
        path: &Path,
        fields: &HashMap<String, String>,
    ) -> Result<(), MediaError> {
        tags::write_tags(path, fields).await
    }
}
