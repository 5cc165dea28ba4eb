//! Stem separation via the separator CLI.

use super::MediaError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Which separator binary and model to invoke.
#[derive(Debug, Clone)]
pub struct SeparatorSettings {
    /// Separator executable, e.g. "spleeter".
    pub program: String,
    /// Model identifier passed to the separator, e.g. "spleeter:5stems".
    pub model: String,
}

impl Default for SeparatorSettings {
    fn default() -> Self {
        Self {
            program: "spleeter".to_string(),
            model: "spleeter:5stems".to_string(),
        }
    }
}

/// Run the separator over one input file.
///
/// The separator writes its stems to `<output_dir>/<input file stem>/`, one
/// audio file per stem.
pub async fn run_separator(
    settings: &SeparatorSettings,
    input: &Path,
    output_dir: &Path,
) -> Result<(), MediaError> {
    tokio::fs::create_dir_all(output_dir).await?;

    let output = Command::new(&settings.program)
        .arg("separate")
        .args(["-p", &settings.model])
        .arg("-o")
        .arg(output_dir)
        .arg(input)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::SeparationFailed(stderr.to_string()));
    }

    info!("Stem separation complete for: {}", input.display());
    Ok(())
}
