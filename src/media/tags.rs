//! Tag read/write via ffprobe and ffmpeg.

use super::MediaError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// ffprobe JSON output structure, format section only.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    tags: Option<serde_json::Value>,
}

/// Read embedded tags from an audio file.
///
/// Tag names are lowercased so the stored mapping is insensitive to the
/// container's capitalization conventions. A file without readable tags
/// yields an empty mapping.
pub async fn read_tags(path: &Path) -> Result<HashMap<String, String>, MediaError> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::ProbeFailed(stderr.to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let probe: FfprobeOutput = serde_json::from_str(&stdout)
        .map_err(|e| MediaError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let mut tags = HashMap::new();
    if let Some(format_tags) = probe.format.tags.as_ref().and_then(|t| t.as_object()) {
        for (key, value) in format_tags {
            if let Some(v) = value.as_str() {
                tags.insert(key.to_lowercase(), v.to_string());
            }
        }
    }

    Ok(tags)
}

/// Write tag fields into an audio file.
///
/// ffmpeg cannot edit tags in place, so the stream is copied into a sibling
/// temp file with the new tags and renamed over the original.
pub async fn write_tags(path: &Path, fields: &HashMap<String, String>) -> Result<(), MediaError> {
    let temp_path = path.with_extension("tagged.tmp.mp3");

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y").arg("-i").arg(path).args(["-map", "0", "-codec", "copy"]);
    for (field, value) in fields {
        cmd.arg("-metadata").arg(format!("{}={}", field, value));
    }
    cmd.arg(&temp_path);

    let result = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        // Leave nothing half-written next to the target.
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(MediaError::TagWriteFailed(stderr.to_string()));
    }

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| MediaError::TagWriteFailed(e.to_string()))?;

    Ok(())
}
