#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Channel failure: {0}")]
    Channel(String),

    #[error("Failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("Failed to publish to {queue}: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Failed to acknowledge {tag}: {reason}")]
    Ack { tag: String, reason: String },
}
