//! Cross-stage shared state: the dedup index and the metadata records.
//!
//! Two key namespaces, both addressed by content hash:
//! - a set of already-submitted job identifiers (the dedup gate)
//! - per-file tag mappings (written once at ingestion, read by later stages)

mod schema;
mod store;

pub use store::{PipelineState, SqliteStateStore};
