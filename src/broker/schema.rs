//! Database schema for the broker.
//!
//! Two tables:
//! - queues: the declared durable queue names
//! - queue_messages: one row per unsettled message

/// SQL schema for the broker database.
pub const BROKER_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS queues (
    name TEXT PRIMARY KEY,
    declared_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS queue_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    body TEXT NOT NULL,

    -- PENDING: waiting for a consumer
    -- IN_FLIGHT: claimed, not yet settled
    status TEXT NOT NULL DEFAULT 'PENDING',

    published_at INTEGER NOT NULL,
    claimed_at INTEGER,
    claimed_by TEXT,
    redelivered INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (queue) REFERENCES queues(name)
);

CREATE INDEX IF NOT EXISTS idx_queue_messages_claim
    ON queue_messages(queue, status, id);
"#;
