//! Database schema for the pipeline state store.

/// SQL schema for the state database.
pub const STATE_SCHEMA_SQL: &str = r#"
-- Dedup index: membership means a job with this id was submitted.
-- Entries are never removed; there is no re-processing window.
CREATE TABLE IF NOT EXISTS submitted_jobs (
    job_id TEXT PRIMARY KEY,
    submitted_at INTEGER NOT NULL
);

-- Per-file tag metadata, keyed by (content hash, field name).
-- Upserts are per-field: last write wins for a field, other fields keep
-- their values.
CREATE TABLE IF NOT EXISTS track_metadata (
    metadata_key TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (metadata_key, field)
);
"#;
