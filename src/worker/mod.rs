//! Generic stage worker.
//!
//! Every pipeline stage is one [`JobHandler`] driven by one [`Worker`]. The
//! worker consumes exactly one message at a time from the handler's queue,
//! publishes whatever follow-on jobs the handler returns, and settles the
//! input message under the poison-message policy: a message that cannot be
//! parsed or processed is negatively acknowledged without requeue and is
//! gone — failures are terminal per message, never retried by the broker.
//!
//! The outer loop owns broker connectivity: on a queue error the worker
//! reconnects through the bounded-retry connection path, re-declares its
//! queue, releases stale in-flight claims for redelivery, and resumes
//! consuming. Exhausting connection attempts is fatal and bubbles out so the
//! process can exit for its supervisor to restart.

use crate::broker::{connect_with_retries, ConnectError, ConnectSettings, Delivery, QueueName, SqliteBroker};
use crate::job::Job;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// When the input message is positively acknowledged relative to the
/// handler's follow-on publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Ack only after all follow-on publishes were attempted, so a crash
    /// between consume and publish surfaces as redelivery rather than
    /// silent loss.
    #[default]
    AfterPublish,
    /// Ack as soon as the result is computed, before the follow-on
    /// publishes. Trades a small loss window for not blocking the next
    /// message on the publishes.
    BeforePublish,
}

/// A follow-on job to publish when the input message is settled.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub queue: QueueName,
    pub job: Job,
}

impl Outbound {
    pub fn new(queue: QueueName, job: Job) -> Self {
        Self { queue, job }
    }
}

/// One stage's transform.
///
/// Returning `Ok` settles the input positively even when no follow-on jobs
/// are emitted (a dead end, not a failure). Returning `Err` invokes the
/// poison-message policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The one queue this stage consumes.
    fn queue(&self) -> QueueName;

    /// Acknowledgement discipline for this stage.
    fn ack_mode(&self) -> AckMode {
        AckMode::AfterPublish
    }

    /// Process one job, returning the follow-on jobs to publish.
    async fn handle(&self, job: Job) -> Result<Vec<Outbound>>;
}

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub connect: ConnectSettings,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// Sleep before reconnecting after a queue error.
    pub reconnect_delay: Duration,
    /// In-flight claims older than this are released for redelivery when
    /// the worker (re)connects.
    pub stale_claim_after: Duration,
}

impl WorkerSettings {
    pub fn new(connect: ConnectSettings) -> Self {
        Self {
            connect,
            poll_interval: Duration::from_millis(500),
            reconnect_delay: Duration::from_secs(5),
            stale_claim_after: Duration::from_secs(3600),
        }
    }
}

/// Drives one [`JobHandler`] against the broker.
pub struct Worker {
    handler: Arc<dyn JobHandler>,
    settings: WorkerSettings,
    /// Identifies this consumer's claims in the broker.
    consumer: String,
}

impl Worker {
    pub fn new(handler: Arc<dyn JobHandler>, settings: WorkerSettings) -> Self {
        let consumer = format!(
            "{}-{}",
            handler.queue(),
            uuid::Uuid::new_v4().simple()
        );
        Self {
            handler,
            settings,
            consumer,
        }
    }

    /// Run until shutdown is requested or connection attempts are exhausted.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConnectError> {
        let queue = self.handler.queue();
        info!("Worker starting, consuming from {}", queue);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // Fatal on exhaustion: crash-and-restart is the supervisor's job.
            let broker = connect_with_retries(&self.settings.connect).await?;
            if let Err(e) = self.register(&broker) {
                warn!("Failed to register consumer on {}: {:#}", queue, e);
                self.pause(self.settings.reconnect_delay, &shutdown).await;
                continue;
            }

            // Consume until the queue errors or shutdown is requested.
            loop {
                if shutdown.is_cancelled() {
                    info!("Worker on {} shutting down", queue);
                    return Ok(());
                }

                match self.process_next(&broker).await {
                    Ok(true) => {}
                    Ok(false) => self.pause(self.settings.poll_interval, &shutdown).await,
                    Err(e) => {
                        error!(
                            "Queue error on {}: {:#}. Reconnecting in {}s...",
                            queue,
                            e,
                            self.settings.reconnect_delay.as_secs()
                        );
                        break;
                    }
                }
            }

            self.pause(self.settings.reconnect_delay, &shutdown).await;
        }

        info!("Worker on {} stopped", queue);
        Ok(())
    }

    /// Declare the queue and release stale claims left by dead consumers.
    fn register(&self, broker: &SqliteBroker) -> Result<()> {
        let queue = self.handler.queue();
        broker.declare(queue)?;
        let released = broker.release_stale(queue, self.settings.stale_claim_after)?;
        if released > 0 {
            info!("Released {} stale in-flight messages on {}", released, queue);
        }
        Ok(())
    }

    /// Claim and process at most one message.
    ///
    /// Returns `Ok(true)` when a message was settled (positively or not),
    /// `Ok(false)` when the queue was empty, and `Err` only for queue I/O
    /// failures — handler failures are absorbed by the poison policy.
    pub async fn process_next(&self, broker: &SqliteBroker) -> Result<bool> {
        match broker.claim_next(self.handler.queue(), &self.consumer)? {
            Some(delivery) => {
                self.process_delivery(broker, delivery).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process_delivery(&self, broker: &SqliteBroker, delivery: Delivery) {
        let queue = self.handler.queue();

        let job = match Job::parse(&delivery.body) {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    "Dropping unparsable message {} from {}: {}",
                    delivery.id, queue, e
                );
                self.settle_reject(broker, delivery.id);
                return;
            }
        };

        debug!(
            job_id = %job.job_id,
            kind = %job.kind,
            redelivered = delivery.redelivered,
            "Received job from {}", queue
        );

        match self.handler.handle(job).await {
            Ok(outbound) => match self.handler.ack_mode() {
                AckMode::BeforePublish => {
                    self.settle_ack(broker, delivery.id);
                    self.publish_all(broker, outbound);
                }
                AckMode::AfterPublish => {
                    self.publish_all(broker, outbound);
                    self.settle_ack(broker, delivery.id);
                }
            },
            Err(e) => {
                error!(
                    "Error processing message {} from {}, dropping: {:#}",
                    delivery.id, queue, e
                );
                self.settle_reject(broker, delivery.id);
            }
        }
    }

    fn publish_all(&self, broker: &SqliteBroker, outbound: Vec<Outbound>) {
        for out in outbound {
            let body = match out.job.to_json() {
                Ok(body) => body,
                Err(e) => {
                    error!("Failed to serialize follow-on job for {}: {}", out.queue, e);
                    continue;
                }
            };
            match broker.publish(out.queue, &body) {
                Ok(_) => info!(
                    "Sent {} job {} to {}",
                    out.job.kind, out.job.job_id, out.queue
                ),
                Err(e) => error!("Failed to publish follow-on job to {}: {:#}", out.queue, e),
            }
        }
    }

    fn settle_ack(&self, broker: &SqliteBroker, id: i64) {
        if let Err(e) = broker.ack(id) {
            error!("Failed to ack message {}: {:#}", id, e);
        }
    }

    fn settle_reject(&self, broker: &SqliteBroker, id: i64) {
        if let Err(e) = broker.reject(id) {
            error!("Failed to reject message {}: {:#}", id, e);
        }
    }

    async fn pause(&self, duration: Duration, shutdown: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.cancelled() => {}
        }
    }
}
