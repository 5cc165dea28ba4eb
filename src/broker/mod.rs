//! Durable message broker for inter-stage job handoff.
//!
//! Queues live in a single SQLite database on the shared pipeline volume.
//! Publishing is a durable insert; consuming claims the oldest pending
//! message in a named queue, holding at most one claim per consumer at a
//! time. A settled message is deleted: positively acknowledged after
//! processing, or negatively acknowledged without requeue (dropped) when it
//! cannot be processed. Messages left in flight by a dead consumer are
//! released back to pending and redelivered.

mod connect;
mod models;
mod schema;
mod store;

pub use connect::{connect_with_retries, ConnectError, ConnectSettings};
pub use models::{Delivery, QueueName};
pub use store::SqliteBroker;
