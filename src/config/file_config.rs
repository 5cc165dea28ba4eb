use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub data_dir: Option<String>,
    pub inbox_dir: Option<String>,
    pub originals_dir: Option<String>,
    pub stems_dir: Option<String>,
    pub output_dir: Option<String>,

    // Feature configs
    pub broker: Option<BrokerConfig>,
    pub watcher: Option<WatcherConfig>,
    pub media: Option<MediaConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub max_connect_attempts: Option<u32>,
    pub connect_retry_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub stale_claim_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WatcherConfig {
    pub scan_interval_secs: Option<u64>,
    pub file_poll_secs: Option<u64>,
    pub dir_check_secs: Option<u64>,
    pub dir_stable_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MediaConfig {
    pub separator_program: Option<String>,
    pub separator_model: Option<String>,
    pub bitrate_kbps: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
