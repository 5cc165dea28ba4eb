//! End-to-end pipeline tests.
//!
//! Drives jobs through the real broker and state databases on a temp
//! directory, with scripted media operations standing in for the external
//! separator/ffmpeg calls. Each stage worker is stepped one message at a
//! time so handoff, acknowledgement, and cleanup behavior are observable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use stemline::broker::ConnectSettings;
use stemline::media::{MediaError, MediaOps};
use stemline::stages::{ApplyMetadataStage, CleanupStage, CombineStage, ConvertStage, SplitStage};
use stemline::state::SqliteStateStore;
use stemline::watcher::{IngestOutcome, IngestSettings, Ingestor};
use stemline::worker::{AckMode, JobHandler, Worker, WorkerSettings};
use stemline::{Job, QueueName, SqliteBroker};

/// Scripted media operations. Separation writes the configured stems,
/// transcode/mix write their outputs, tag writes are recorded.
struct ScriptedMedia {
    tags: HashMap<String, String>,
    stems: Vec<&'static str>,
    failing_transcodes: Vec<&'static str>,
    written_tags: Mutex<Vec<(PathBuf, HashMap<String, String>)>>,
}

impl ScriptedMedia {
    fn new(tags: HashMap<String, String>) -> Self {
        Self {
            tags,
            stems: vec!["drums.wav", "bass.wav", "other.wav", "vocals.wav"],
            failing_transcodes: Vec::new(),
            written_tags: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MediaOps for ScriptedMedia {
    async fn separate(&self, input: &Path, output_dir: &Path) -> Result<(), MediaError> {
        let base = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MediaError::SeparationFailed("bad input name".to_string()))?;
        let folder = output_dir.join(base);
        std::fs::create_dir_all(&folder)?;
        for stem in &self.stems {
            std::fs::write(folder.join(stem), b"stem audio")?;
        }
        Ok(())
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let name = input.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if self.failing_transcodes.contains(&name) {
            return Err(MediaError::TranscodeFailed(format!("scripted: {}", name)));
        }
        std::fs::write(output, b"mp3 bytes")?;
        Ok(())
    }

    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        if inputs.is_empty() {
            return Err(MediaError::MixFailed("no inputs".to_string()));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, b"mixed instrumental")?;
        Ok(())
    }

    async fn read_tags(&self, _path: &Path) -> Result<HashMap<String, String>, MediaError> {
        Ok(self.tags.clone())
    }

    async fn write_tags(
        &self,
        path: &Path,
        fields: &HashMap<String, String>,
    ) -> Result<(), MediaError> {
        self.written_tags
            .lock()
            .unwrap()
            .push((path.to_path_buf(), fields.clone()));
        Ok(())
    }
}

struct PipelineFixture {
    _dir: TempDir,
    inbox: PathBuf,
    originals: PathBuf,
    stems: PathBuf,
    music: PathBuf,
    broker: SqliteBroker,
    state: Arc<SqliteStateStore>,
    media: Arc<ScriptedMedia>,
}

impl PipelineFixture {
    fn new(media: ScriptedMedia) -> Self {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("downloads");
        std::fs::create_dir_all(&inbox).unwrap();
        Self {
            inbox,
            originals: dir.path().join("originals"),
            stems: dir.path().join("stems"),
            music: dir.path().join("music"),
            broker: SqliteBroker::open(dir.path().join("broker.db")).unwrap(),
            state: Arc::new(SqliteStateStore::open(dir.path().join("state.db")).unwrap()),
            media: Arc::new(media),
            _dir: dir,
        }
    }

    fn ingestor(&self) -> Ingestor {
        let settings = IngestSettings {
            file_poll: Duration::from_millis(5),
            dir_check_interval: Duration::from_millis(5),
            dir_min_stable: Duration::from_millis(10),
        };
        Ingestor::new(
            self.broker.clone(),
            self.state.clone(),
            self.media.clone(),
            self.inbox.clone(),
            self.originals.clone(),
            settings,
        )
    }

    fn worker(&self, handler: Arc<dyn JobHandler>) -> Worker {
        let connect = ConnectSettings::new(self._dir.path().join("broker.db"));
        Worker::new(handler, WorkerSettings::new(connect))
    }

    fn split_worker(&self) -> Worker {
        self.worker(Arc::new(SplitStage::new(
            self.state.clone(),
            self.media.clone(),
            self.originals.clone(),
            self.stems.clone(),
        )))
    }

    fn convert_worker(&self) -> Worker {
        self.worker(Arc::new(ConvertStage::new(self.media.clone())))
    }

    fn combine_worker(&self) -> Worker {
        self.worker(Arc::new(CombineStage::new(
            self.state.clone(),
            self.media.clone(),
            self.music.clone(),
            self.inbox.clone(),
            self.stems.clone(),
        )))
    }

    fn tag_worker(&self) -> Worker {
        self.worker(Arc::new(ApplyMetadataStage::new(
            self.state.clone(),
            self.media.clone(),
        )))
    }

    fn clean_worker(&self) -> Worker {
        self.worker(Arc::new(CleanupStage::new()))
    }

    /// Step every stage worker until all queues drain.
    async fn drain_pipeline(&self) {
        let workers = [
            self.split_worker(),
            self.convert_worker(),
            self.combine_worker(),
            self.tag_worker(),
            self.clean_worker(),
        ];
        loop {
            let mut progressed = false;
            for worker in &workers {
                while worker.process_next(&self.broker).await.unwrap() {
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn queue_depths(&self) -> HashMap<QueueName, usize> {
        QueueName::ALL
            .iter()
            .map(|q| (*q, self.broker.pending_count(*q).unwrap()))
            .collect()
    }
}

fn tagged(title: &str, artist: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    tags.insert("title".to_string(), title.to_string());
    tags.insert("artist".to_string(), artist.to_string());
    tags
}

#[tokio::test]
async fn test_full_pipeline_happy_path() {
    let fx = PipelineFixture::new(ScriptedMedia::new(tagged("Song", "Band")));

    let download = fx.inbox.join("raw download.mp3");
    std::fs::write(&download, b"original audio bytes").unwrap();

    let outcome = fx.ingestor().process_file(&download).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Submitted);

    fx.drain_pipeline().await;

    // The finished instrumental exists under its canonical name.
    let final_file = fx.music.join("Song - Band - (Instrumental).mp3");
    assert!(final_file.exists(), "final instrumental missing");

    // Metadata round-trip: the fields stored at ingestion are exactly the
    // fields applied to the final file.
    let written = fx.media.written_tags.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, final_file);
    assert_eq!(written[0].1, tagged("Song", "Band"));
    drop(written);

    // Cleanup completeness: the original and the stem working folders are
    // reclaimed; the finished file is untouched.
    assert!(!fx.originals.join("Song - Band.mp3").exists());
    assert!(!fx.stems.join("Song - Band").exists());
    assert!(final_file.exists());

    // Every queue drained, nothing left in flight.
    for (queue, depth) in fx.queue_depths() {
        assert_eq!(depth, 0, "queue {} not drained", queue);
    }
    for queue in QueueName::ALL {
        assert_eq!(fx.broker.in_flight_count(queue).unwrap(), 0);
    }
}

#[tokio::test]
async fn test_dedup_idempotence() {
    let fx = PipelineFixture::new(ScriptedMedia::new(HashMap::new()));
    let ingestor = fx.ingestor();

    // The same content arrives twice before anything consumes it.
    let first = fx.inbox.join("song.mp3");
    std::fs::write(&first, b"identical bytes").unwrap();
    assert_eq!(
        ingestor.process_file(&first).await.unwrap(),
        IngestOutcome::Submitted
    );

    let second = fx.inbox.join("song again.mp3");
    std::fs::write(&second, b"identical bytes").unwrap();
    assert_eq!(
        ingestor.process_file(&second).await.unwrap(),
        IngestOutcome::Duplicate
    );

    // Exactly one job ever reaches the initial queue.
    assert_eq!(fx.broker.pending_count(QueueName::Ingest).unwrap(), 1);
}

#[tokio::test]
async fn test_partial_transcode_tolerance() {
    let mut media = ScriptedMedia::new(HashMap::new());
    media.stems = vec!["drums.wav", "bass.wav", "piano.wav", "vocals.wav"];
    media.failing_transcodes = vec!["bass.wav"];
    let fx = PipelineFixture::new(media);

    let download = fx.inbox.join("song.mp3");
    std::fs::write(&download, b"audio").unwrap();
    fx.ingestor().process_file(&download).await.unwrap();

    fx.split_worker().process_next(&fx.broker).await.unwrap();
    fx.convert_worker().process_next(&fx.broker).await.unwrap();

    // One of three usable stems failed: exactly two proceed to combine.
    let delivery = fx
        .broker
        .claim_next(QueueName::Combine, "test")
        .unwrap()
        .expect("combine job expected");
    let job = Job::parse(&delivery.body).unwrap();
    assert_eq!(job.stems, vec!["drums.mp3", "piano.mp3"]);
}

#[tokio::test]
async fn test_total_transcode_failure_emits_no_combine_job() {
    let mut media = ScriptedMedia::new(HashMap::new());
    media.stems = vec!["drums.wav", "bass.wav", "vocals.wav"];
    media.failing_transcodes = vec!["drums.wav", "bass.wav"];
    let fx = PipelineFixture::new(media);

    let download = fx.inbox.join("song.mp3");
    std::fs::write(&download, b"audio").unwrap();
    fx.ingestor().process_file(&download).await.unwrap();

    fx.split_worker().process_next(&fx.broker).await.unwrap();
    fx.convert_worker().process_next(&fx.broker).await.unwrap();

    assert_eq!(fx.broker.pending_count(QueueName::Combine).unwrap(), 0);
    // The convert job was still settled, not stuck in flight.
    assert_eq!(fx.broker.in_flight_count(QueueName::Convert).unwrap(), 0);
}

#[tokio::test]
async fn test_no_stems_dead_end() {
    let mut media = ScriptedMedia::new(HashMap::new());
    media.stems = vec!["vocals.wav"];
    let fx = PipelineFixture::new(media);

    let download = fx.inbox.join("acapella.mp3");
    std::fs::write(&download, b"just vocals").unwrap();
    fx.ingestor().process_file(&download).await.unwrap();

    fx.split_worker().process_next(&fx.broker).await.unwrap();

    // No convert job, no stuck message, no error beyond a log line.
    assert_eq!(fx.broker.pending_count(QueueName::Convert).unwrap(), 0);
    assert_eq!(fx.broker.in_flight_count(QueueName::Ingest).unwrap(), 0);
}

#[tokio::test]
async fn test_poison_message_isolation() {
    let fx = PipelineFixture::new(ScriptedMedia::new(HashMap::new()));

    // A malformed body ahead of a real job.
    fx.broker
        .publish(QueueName::Ingest, "definitely not a job")
        .unwrap();
    let download = fx.inbox.join("song.mp3");
    std::fs::write(&download, b"audio").unwrap();
    fx.ingestor().process_file(&download).await.unwrap();

    let worker = fx.split_worker();
    // Poison is dropped without crashing the consumer...
    assert!(worker.process_next(&fx.broker).await.unwrap());
    assert_eq!(fx.broker.pending_count(QueueName::Convert).unwrap(), 0);
    // ...and the next message processes normally.
    assert!(worker.process_next(&fx.broker).await.unwrap());
    assert_eq!(fx.broker.pending_count(QueueName::Convert).unwrap(), 1);
}

#[tokio::test]
async fn test_crashed_consumer_claim_redelivered() {
    let fx = PipelineFixture::new(ScriptedMedia::new(HashMap::new()));

    let download = fx.inbox.join("song.mp3");
    std::fs::write(&download, b"audio").unwrap();
    fx.ingestor().process_file(&download).await.unwrap();

    // A consumer claims the job and dies before settling it.
    let lost = fx
        .broker
        .claim_next(QueueName::Ingest, "crashed-worker")
        .unwrap()
        .unwrap();
    assert!(!lost.redelivered);

    // A restarting worker releases the stale claim and the job flows again.
    fx.broker
        .release_stale(QueueName::Ingest, Duration::ZERO)
        .unwrap();
    let redelivered = fx
        .broker
        .claim_next(QueueName::Ingest, "fresh-worker")
        .unwrap()
        .unwrap();
    assert!(redelivered.redelivered);
    assert_eq!(redelivered.body, lost.body);
}

#[tokio::test]
async fn test_ack_discipline_per_stage() {
    let fx = PipelineFixture::new(ScriptedMedia::new(HashMap::new()));

    // Combine acks before its follow-on publishes; every other stage acks
    // only after all publishes were attempted.
    let combine = CombineStage::new(
        fx.state.clone(),
        fx.media.clone(),
        fx.music.clone(),
        fx.inbox.clone(),
        fx.stems.clone(),
    );
    assert_eq!(combine.ack_mode(), AckMode::BeforePublish);

    let split = SplitStage::new(
        fx.state.clone(),
        fx.media.clone(),
        fx.originals.clone(),
        fx.stems.clone(),
    );
    assert_eq!(split.ack_mode(), AckMode::AfterPublish);
    assert_eq!(ConvertStage::new(fx.media.clone()).ack_mode(), AckMode::AfterPublish);
    assert_eq!(
        ApplyMetadataStage::new(fx.state.clone(), fx.media.clone()).ack_mode(),
        AckMode::AfterPublish
    );
    assert_eq!(CleanupStage::new().ack_mode(), AckMode::AfterPublish);
}

#[tokio::test]
async fn test_album_folder_expands_to_tracks() {
    let fx = PipelineFixture::new(ScriptedMedia::new(HashMap::new()));

    let album = fx.inbox.join("Great Album");
    std::fs::create_dir(&album).unwrap();
    std::fs::write(album.join("01.mp3"), b"track one bytes").unwrap();
    std::fs::write(album.join("02.mp3"), b"track two bytes").unwrap();

    let outcomes = fx.ingestor().process_directory(&album).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(!album.exists());

    fx.drain_pipeline().await;

    // Two finished instrumentals, untagged so named from the filenames.
    assert!(fx.music.join("01_combined.mp3").exists());
    assert!(fx.music.join("02_combined.mp3").exists());
}

#[tokio::test]
async fn test_cleanup_jobs_only_touch_listed_paths() {
    let fx = PipelineFixture::new(ScriptedMedia::new(tagged("Song", "Band")));

    // An unrelated file sits in every pipeline directory.
    std::fs::create_dir_all(&fx.originals).unwrap();
    let bystander = fx.originals.join("unrelated.mp3");
    std::fs::write(&bystander, b"do not touch").unwrap();

    let download = fx.inbox.join("song.mp3");
    std::fs::write(&download, b"audio").unwrap();
    fx.ingestor().process_file(&download).await.unwrap();

    fx.drain_pipeline().await;

    assert!(bystander.exists());
}
