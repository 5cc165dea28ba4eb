use std::fmt;

/// The named queues each stage consumes.
///
/// `Ingest` is the initial queue: the watcher publishes deduplicated
/// `track`/`album` jobs there and the split stage consumes them. The rest
/// follow the pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Ingest,
    Convert,
    Combine,
    Metadata,
    Cleanup,
}

impl QueueName {
    /// Every queue the pipeline declares.
    pub const ALL: [QueueName; 5] = [
        QueueName::Ingest,
        QueueName::Convert,
        QueueName::Combine,
        QueueName::Metadata,
        QueueName::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Ingest => "ingest_jobs",
            QueueName::Convert => "convert_jobs",
            QueueName::Combine => "combine_jobs",
            QueueName::Metadata => "metadata_jobs",
            QueueName::Cleanup => "cleanup_jobs",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A claimed message. The consumer must settle it exactly once, with either
/// `ack` (processed) or `reject` (dropped, never requeued).
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned delivery tag.
    pub id: i64,
    pub queue: QueueName,
    /// Serialized message body.
    pub body: String,
    pub published_at: i64,
    /// True when this message was previously claimed and released, i.e. a
    /// prior consumer died between consume and settle.
    pub redelivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names_unique() {
        let mut names: Vec<&str> = QueueName::ALL.iter().map(|q| q.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), QueueName::ALL.len());
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(QueueName::Ingest.to_string(), "ingest_jobs");
        assert_eq!(QueueName::Cleanup.to_string(), "cleanup_jobs");
    }
}
