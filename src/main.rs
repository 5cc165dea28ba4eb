use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stemline::broker::connect_with_retries;
use stemline::config::{AppConfig, CliConfig, FileConfig};
use stemline::media::{FfmpegMedia, MediaOps};
use stemline::stages::{ApplyMetadataStage, CleanupStage, CombineStage, ConvertStage, SplitStage};
use stemline::state::{PipelineState, SqliteStateStore};
use stemline::watcher::{Ingestor, Watcher};
use stemline::worker::{JobHandler, Worker};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "stemline", about = "Audio stem-processing pipeline workers")]
struct CliArgs {
    /// Path to a TOML configuration file. TOML values override CLI flags.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Directory holding the broker and state databases.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Downloads inbox the watcher scans for new files and folders.
    #[clap(long)]
    inbox_dir: Option<PathBuf>,

    /// Canonical store for untouched source files.
    #[clap(long)]
    originals_dir: Option<PathBuf>,

    /// Working area for per-track separated stems.
    #[clap(long)]
    stems_dir: Option<PathBuf>,

    /// Final output directory for finished instrumentals.
    #[clap(long)]
    output_dir: Option<PathBuf>,

    #[clap(subcommand)]
    command: StageCommand,
}

#[derive(Subcommand, Debug)]
enum StageCommand {
    /// Watch the downloads inbox and feed the pipeline.
    Watch,
    /// Separate ingested tracks into stems.
    Split,
    /// Transcode separated stems.
    Convert,
    /// Mix converted stems into the final instrumental.
    Combine,
    /// Apply stored metadata to finished files.
    Tag,
    /// Reclaim temporary artifacts.
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        data_dir: cli.data_dir.clone(),
        inbox_dir: cli.inbox_dir.clone(),
        originals_dir: cli.originals_dir.clone(),
        stems_dir: cli.stems_dir.clone(),
        output_dir: cli.output_dir.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
    })
    .context("Failed to install shutdown handler")?;

    let state: Arc<dyn PipelineState> = Arc::new(
        SqliteStateStore::open(config.state_db_path())
            .context("Failed to open pipeline state store")?,
    );
    let media: Arc<dyn MediaOps> = Arc::new(FfmpegMedia::new(
        config.separator_settings(),
        config.media.bitrate_kbps,
    ));

    match cli.command {
        StageCommand::Watch => {
            // The watcher publishes rather than consumes, so it connects
            // up front instead of through a worker loop.
            let broker = connect_with_retries(&config.connect_settings()).await?;
            let ingestor = Ingestor::new(
                broker,
                state,
                media,
                config.inbox_dir.clone(),
                config.originals_dir.clone(),
                config.ingest_settings(),
            );
            let watcher = Watcher::new(
                ingestor,
                config.inbox_dir.clone(),
                Duration::from_secs(config.watcher.scan_interval_secs),
            );
            watcher.run(shutdown).await
        }
        StageCommand::Split => {
            let handler = SplitStage::new(
                state,
                media,
                config.originals_dir.clone(),
                config.stems_dir.clone(),
            );
            run_worker(Arc::new(handler), &config, shutdown).await
        }
        StageCommand::Convert => {
            run_worker(Arc::new(ConvertStage::new(media)), &config, shutdown).await
        }
        StageCommand::Combine => {
            let handler = CombineStage::new(
                state,
                media,
                config.output_dir.clone(),
                config.inbox_dir.clone(),
                config.stems_dir.clone(),
            );
            run_worker(Arc::new(handler), &config, shutdown).await
        }
        StageCommand::Tag => {
            run_worker(Arc::new(ApplyMetadataStage::new(state, media)), &config, shutdown).await
        }
        StageCommand::Clean => run_worker(Arc::new(CleanupStage::new()), &config, shutdown).await,
    }
}

async fn run_worker(
    handler: Arc<dyn JobHandler>,
    config: &AppConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Starting {} worker", handler.queue());
    let worker = Worker::new(handler, config.worker_settings());
    worker.run(shutdown).await?;
    Ok(())
}
