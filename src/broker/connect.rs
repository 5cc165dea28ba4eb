//! Connection establishment with bounded retry.
//!
//! Worker containers can come up before the shared broker volume is mounted
//! and initialized, so every component opens the broker through this path
//! instead of opening the database directly. Retry applies only to connection
//! establishment; message-processing failures are never retried here.

use super::store::SqliteBroker;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Connection establishment failed after exhausting every attempt.
///
/// Fatal to the calling process: the caller exits and relies on an external
/// supervisor to restart it rather than running degraded.
#[derive(Debug, Error)]
#[error("could not connect to broker at {path:?} after {attempts} attempts")]
pub struct ConnectError {
    pub path: PathBuf,
    pub attempts: u32,
}

/// How a component reaches the broker.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    /// Path to the broker database on the shared volume.
    pub db_path: PathBuf,
    /// Connection attempts before giving up.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub retry_delay: Duration,
}

impl ConnectSettings {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            max_attempts: 15,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Connect to the broker, retrying up to `max_attempts` times with
/// `retry_delay` between attempts. Each failure is logged.
pub async fn connect_with_retries(settings: &ConnectSettings) -> Result<SqliteBroker, ConnectError> {
    for attempt in 1..=settings.max_attempts {
        match SqliteBroker::open(&settings.db_path) {
            Ok(broker) => {
                info!("Connected to broker on attempt {}", attempt);
                return Ok(broker);
            }
            Err(e) => {
                warn!(
                    "Broker not ready (attempt {}/{}): {:#}. Retrying in {}s...",
                    attempt,
                    settings.max_attempts,
                    e,
                    settings.retry_delay.as_secs()
                );
                tokio::time::sleep(settings.retry_delay).await;
            }
        }
    }
    Err(ConnectError {
        path: settings.db_path.clone(),
        attempts: settings.max_attempts,
    })
}
