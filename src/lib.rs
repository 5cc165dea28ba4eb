//! Stemline
//!
//! An audio stem-processing pipeline: a file dropped into the downloads
//! inbox is separated into stems, transcoded, mixed into an instrumental,
//! tagged from its stored metadata, and filed — with every temporary
//! artifact reclaimed at the end. Stages are independently-scaled worker
//! processes connected by durable named queues, with a shared key-value
//! store holding cross-stage metadata and the deduplication index.

pub mod broker;
pub mod config;
pub mod hashing;
pub mod job;
pub mod media;
pub mod stages;
pub mod state;
pub mod watcher;
pub mod worker;

// Re-export commonly used types for convenience
pub use broker::{connect_with_retries, ConnectSettings, QueueName, SqliteBroker};
pub use job::{Job, JobKind, PipelineStage};
pub use state::{PipelineState, SqliteStateStore};
pub use worker::{JobHandler, Worker, WorkerSettings};
