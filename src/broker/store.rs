//! SQLite-backed broker store.
//!
//! One `SqliteBroker` wraps one connection to the shared broker database.
//! Messages survive process and broker restarts; claims are conditional
//! updates so concurrent consumers on the same queue never receive the same
//! message.

use super::models::{Delivery, QueueName};
use super::schema::BROKER_SCHEMA_SQL;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a single statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection to the broker database.
#[derive(Clone)]
pub struct SqliteBroker {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBroker").finish_non_exhaustive()
    }
}

impl SqliteBroker {
    /// Open the broker database, creating the schema if needed.
    ///
    /// Fails when the shared volume is not mounted yet or another process
    /// holds the database locked past the busy timeout; callers that must
    /// tolerate broker startup lag go through [`connect_with_retries`]
    /// instead of calling this directly.
    ///
    /// [`connect_with_retries`]: super::connect_with_retries
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open broker database: {:?}", db_path.as_ref()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(BROKER_SCHEMA_SQL)
            .context("Failed to apply broker schema")?;

        Ok(SqliteBroker {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory broker for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(BROKER_SCHEMA_SQL)?;
        Ok(SqliteBroker {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Declare a durable queue. Idempotent.
    pub fn declare(&self, queue: QueueName) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO queues (name, declared_at) VALUES (?1, ?2)",
            params![queue.as_str(), Self::now()],
        )?;
        Ok(())
    }

    /// Durably publish a message to a named queue.
    pub fn publish(&self, queue: QueueName, body: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO queues (name, declared_at) VALUES (?1, ?2)",
            params![queue.as_str(), Self::now()],
        )?;
        conn.execute(
            "INSERT INTO queue_messages (queue, body, status, published_at)
             VALUES (?1, ?2, 'PENDING', ?3)",
            params![queue.as_str(), body, Self::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Claim the oldest pending message in a queue for `consumer`.
    ///
    /// Returns `None` when the queue is empty. The claim is a conditional
    /// update: if another consumer claims the candidate first, the next
    /// candidate is tried.
    pub fn claim_next(&self, queue: QueueName, consumer: &str) -> Result<Option<Delivery>> {
        let conn = self.conn.lock().unwrap();
        loop {
            let candidate: Option<i64> = conn
                .query_row(
                    "SELECT id FROM queue_messages
                     WHERE queue = ?1 AND status = 'PENDING'
                     ORDER BY id ASC LIMIT 1",
                    params![queue.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            let claimed = conn.execute(
                "UPDATE queue_messages
                 SET status = 'IN_FLIGHT', claimed_at = ?1, claimed_by = ?2
                 WHERE id = ?3 AND status = 'PENDING'",
                params![Self::now(), consumer, id],
            )?;
            if claimed == 0 {
                // Lost the race against another consumer; try the next one.
                continue;
            }

            let delivery = conn.query_row(
                "SELECT body, published_at, redelivered FROM queue_messages WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Delivery {
                        id,
                        queue,
                        body: row.get(0)?,
                        published_at: row.get(1)?,
                        redelivered: row.get::<_, i64>(2)? != 0,
                    })
                },
            )?;
            return Ok(Some(delivery));
        }
    }

    /// Positively acknowledge a claimed message, removing it from the queue.
    pub fn ack(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM queue_messages WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Negatively acknowledge a claimed message without requeue.
    ///
    /// The message is removed permanently; there is no dead-letter queue, so
    /// the caller is expected to log what was dropped.
    pub fn reject(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM queue_messages WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Release in-flight messages claimed longer ago than `older_than` back
    /// to pending, marking them redelivered.
    ///
    /// Called by a (re)starting consumer: the claims of a consumer that died
    /// between consume and settle become eligible for redelivery, while
    /// claims held by live siblings within the threshold are left alone.
    pub fn release_stale(&self, queue: QueueName, older_than: Duration) -> Result<usize> {
        let cutoff = Self::now() - older_than.as_secs() as i64;
        let conn = self.conn.lock().unwrap();
        let released = conn.execute(
            "UPDATE queue_messages
             SET status = 'PENDING', claimed_at = NULL, claimed_by = NULL, redelivered = 1
             WHERE queue = ?1 AND status = 'IN_FLIGHT' AND claimed_at <= ?2",
            params![queue.as_str(), cutoff],
        )?;
        Ok(released)
    }

    /// Number of pending messages in a queue.
    pub fn pending_count(&self, queue: QueueName) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND status = 'PENDING'",
            params![queue.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of claimed-but-unsettled messages in a queue.
    pub fn in_flight_count(&self, queue: QueueName) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND status = 'IN_FLIGHT'",
            params![queue.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}
