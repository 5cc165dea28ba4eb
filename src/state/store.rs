//! SQLite store for the dedup index and metadata records.

use super::schema::STATE_SCHEMA_SQL;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for cross-stage pipeline state.
///
/// `is_duplicate` and `mark_submitted` together form the dedup gate. They
/// are deliberately two separate calls, not an atomic check-and-set:
/// concurrent ingestion of the same file from two watcher instances can both
/// pass the check before either marks it. The deployed assumption is a
/// single watcher instance.
pub trait PipelineState: Send + Sync {
    /// Whether a job with this id was already submitted.
    fn is_duplicate(&self, job_id: &str) -> Result<bool>;

    /// Record a job id as submitted. Idempotent.
    fn mark_submitted(&self, job_id: &str) -> Result<()>;

    /// Upsert tag fields for a content key. Per-field last-write-wins;
    /// fields absent from `fields` are left untouched.
    fn put_metadata(&self, key: &str, fields: &HashMap<String, String>) -> Result<()>;

    /// Fetch the tag mapping for a content key. An absent key yields an
    /// empty mapping, not an error.
    fn get_metadata(&self, key: &str) -> Result<HashMap<String, String>>;
}

/// How long a single statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite implementation of [`PipelineState`].
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open or create the state database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open state database: {:?}", db_path.as_ref()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(STATE_SCHEMA_SQL)
            .context("Failed to apply state schema")?;

        Ok(SqliteStateStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STATE_SCHEMA_SQL)?;
        Ok(SqliteStateStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl PipelineState for SqliteStateStore {
    fn is_duplicate(&self, job_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM submitted_jobs WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn mark_submitted(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO submitted_jobs (job_id, submitted_at) VALUES (?1, ?2)",
            params![job_id, Self::now()],
        )?;
        Ok(())
    }

    fn put_metadata(&self, key: &str, fields: &HashMap<String, String>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for (field, value) in fields {
            conn.execute(
                "INSERT INTO track_metadata (metadata_key, field, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (metadata_key, field)
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, field, value, Self::now()],
            )?;
        }
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT field, value FROM track_metadata WHERE metadata_key = ?1")?;
        let fields = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(fields)
    }
}
