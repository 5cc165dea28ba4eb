mod file_config;

pub use file_config::{BrokerConfig, FileConfig, MediaConfig, WatcherConfig};

use crate::broker::ConnectSettings;
use crate::media::SeparatorSettings;
use crate::watcher::IngestSettings;
use crate::worker::WorkerSettings;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that take part in config resolution.
/// Mirrors the CLI flags that a TOML config file can override.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
    pub inbox_dir: Option<PathBuf>,
    pub originals_dir: Option<PathBuf>,
    pub stems_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Holds the broker and state databases.
    pub data_dir: PathBuf,
    /// The downloads inbox the watcher scans.
    pub inbox_dir: PathBuf,
    /// Canonical store for untouched source files.
    pub originals_dir: PathBuf,
    /// Per-track stem working folders.
    pub stems_dir: PathBuf,
    /// Finished instrumentals.
    pub output_dir: PathBuf,

    pub broker: BrokerSettings,
    pub watcher: WatcherSettings,
    pub media: MediaSettings,
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub max_connect_attempts: u32,
    pub connect_retry_secs: u64,
    pub poll_interval_ms: u64,
    pub reconnect_delay_secs: u64,
    pub stale_claim_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_connect_attempts: 15,
            connect_retry_secs: 5,
            poll_interval_ms: 500,
            reconnect_delay_secs: 5,
            stale_claim_secs: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub scan_interval_secs: u64,
    pub file_poll_secs: u64,
    pub dir_check_secs: u64,
    pub dir_stable_secs: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 2,
            file_poll_secs: 10,
            dir_check_secs: 2,
            dir_stable_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub separator_program: String,
    pub separator_model: String,
    pub bitrate_kbps: u32,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            separator_program: "spleeter".to_string(),
            separator_model: "spleeter:5stems".to_string(),
            bitrate_kbps: 320,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("data_dir must be specified via --data-dir or in config file")
            })?;

        if !data_dir.exists() {
            bail!("Data directory does not exist: {:?}", data_dir);
        }
        if !data_dir.is_dir() {
            bail!("data_dir is not a directory: {:?}", data_dir);
        }

        // Pipeline directories default to siblings inside data_dir so a
        // single shared volume works out of the box.
        let inbox_dir = file
            .inbox_dir
            .map(PathBuf::from)
            .or_else(|| cli.inbox_dir.clone())
            .unwrap_or_else(|| data_dir.join("downloads"));
        let originals_dir = file
            .originals_dir
            .map(PathBuf::from)
            .or_else(|| cli.originals_dir.clone())
            .unwrap_or_else(|| data_dir.join("originals"));
        let stems_dir = file
            .stems_dir
            .map(PathBuf::from)
            .or_else(|| cli.stems_dir.clone())
            .unwrap_or_else(|| data_dir.join("stems"));
        let output_dir = file
            .output_dir
            .map(PathBuf::from)
            .or_else(|| cli.output_dir.clone())
            .unwrap_or_else(|| data_dir.join("music"));

        let broker_defaults = BrokerSettings::default();
        let broker_file = file.broker.unwrap_or_default();
        let broker = BrokerSettings {
            max_connect_attempts: broker_file
                .max_connect_attempts
                .unwrap_or(broker_defaults.max_connect_attempts),
            connect_retry_secs: broker_file
                .connect_retry_secs
                .unwrap_or(broker_defaults.connect_retry_secs),
            poll_interval_ms: broker_file
                .poll_interval_ms
                .unwrap_or(broker_defaults.poll_interval_ms),
            reconnect_delay_secs: broker_file
                .reconnect_delay_secs
                .unwrap_or(broker_defaults.reconnect_delay_secs),
            stale_claim_secs: broker_file
                .stale_claim_secs
                .unwrap_or(broker_defaults.stale_claim_secs),
        };

        let watcher_defaults = WatcherSettings::default();
        let watcher_file = file.watcher.unwrap_or_default();
        let watcher = WatcherSettings {
            scan_interval_secs: watcher_file
                .scan_interval_secs
                .unwrap_or(watcher_defaults.scan_interval_secs),
            file_poll_secs: watcher_file
                .file_poll_secs
                .unwrap_or(watcher_defaults.file_poll_secs),
            dir_check_secs: watcher_file
                .dir_check_secs
                .unwrap_or(watcher_defaults.dir_check_secs),
            dir_stable_secs: watcher_file
                .dir_stable_secs
                .unwrap_or(watcher_defaults.dir_stable_secs),
        };

        let media_defaults = MediaSettings::default();
        let media_file = file.media.unwrap_or_default();
        let media = MediaSettings {
            separator_program: media_file
                .separator_program
                .unwrap_or(media_defaults.separator_program),
            separator_model: media_file
                .separator_model
                .unwrap_or(media_defaults.separator_model),
            bitrate_kbps: media_file.bitrate_kbps.unwrap_or(media_defaults.bitrate_kbps),
        };

        Ok(Self {
            data_dir,
            inbox_dir,
            originals_dir,
            stems_dir,
            output_dir,
            broker,
            watcher,
            media,
        })
    }

    pub fn broker_db_path(&self) -> PathBuf {
        self.data_dir.join("broker.db")
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    pub fn connect_settings(&self) -> ConnectSettings {
        ConnectSettings {
            db_path: self.broker_db_path(),
            max_attempts: self.broker.max_connect_attempts,
            retry_delay: Duration::from_secs(self.broker.connect_retry_secs),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            connect: self.connect_settings(),
            poll_interval: Duration::from_millis(self.broker.poll_interval_ms),
            reconnect_delay: Duration::from_secs(self.broker.reconnect_delay_secs),
            stale_claim_after: Duration::from_secs(self.broker.stale_claim_secs),
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            file_poll: Duration::from_secs(self.watcher.file_poll_secs),
            dir_check_interval: Duration::from_secs(self.watcher.dir_check_secs),
            dir_min_stable: Duration::from_secs(self.watcher.dir_stable_secs),
        }
    }

    pub fn separator_settings(&self) -> SeparatorSettings {
        SeparatorSettings {
            program: self.media.separator_program.clone(),
            model: self.media.separator_model.clone(),
        }
    }
}
