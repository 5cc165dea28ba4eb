//! Stem mixing via ffmpeg.

use super::MediaError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Mix the input files down to a single output, matching the longest input.
pub async fn mix_tracks(inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
    if inputs.is_empty() {
        return Err(MediaError::MixFailed("no input files".to_string()));
    }
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y");
    for input in inputs {
        cmd.arg("-i").arg(input);
    }
    let filter = format!("amix=inputs={}:duration=longest", inputs.len());
    cmd.args(["-filter_complex", &filter]).arg(output);

    let result = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(MediaError::MixFailed(stderr.to_string()));
    }

    info!("Mixed {} inputs into {}", inputs.len(), output.display());
    Ok(())
}
