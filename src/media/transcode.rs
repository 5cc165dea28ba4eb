//! Stem transcoding via ffmpeg.

use super::MediaError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Transcode an audio file to MP3.
///
/// # Arguments
/// * `input` - Path to the input audio file (typically a separated WAV stem)
/// * `output` - Path for the output MP3 file
/// * `bitrate_kbps` - Target bitrate in kbps (e.g., 320)
pub async fn transcode_to_mp3(
    input: &Path,
    output: &Path,
    bitrate_kbps: u32,
) -> Result<(), MediaError> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let result = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-c:a", "libmp3lame"])
        .args(["-b:a", &format!("{}k", bitrate_kbps)])
        .arg("-vn")
        .arg(output)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(MediaError::TranscodeFailed(stderr.to_string()));
    }

    Ok(())
}
