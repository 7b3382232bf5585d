// ============================================================================
// Messaging - Broker connection, consumption and publication
// ============================================================================
//
// - `Connection` / `Channel` own the rdkafka clients for one broker session
// - `ConsumeLoop` pulls deliveries, redelivers or dead-letters the ones
//   left unacknowledged
// - `Delivery` carries a message payload plus its acknowledgment capability
// - `OffsetTracker` turns per-message acks into safe cumulative commits
// - `Publisher`, `Consume` and `Connector` are the seams the relay uses
//
// ============================================================================

mod consumer;
mod delivery;
mod error;
mod kafka;
mod offsets;

use async_trait::async_trait;
use std::future::Future;
use tokio::sync::watch;

use crate::config::BrokerConfig;

pub use delivery::{Acknowledge, Delivery, DeliveryTag};
pub use error::QueueError;
pub use kafka::KafkaConnector;
pub use offsets::OffsetTracker;

/// Best-effort publication to a named queue. No built-in retry.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError>;
}

/// Delivers messages of a queue to `handler`, one at a time, until shutdown
/// (`Ok`) or until the channel is lost (`Err`).
#[async_trait]
pub trait Consume: Send + Sync {
    async fn consume<F, Fut>(
        &self,
        queue: &str,
        shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<(), QueueError>
    where
        F: FnMut(Delivery) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static;
}

/// Establishes a broker session with every queue declared.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Channel: Consume + Publisher + 'static;

    async fn establish(&self, config: &BrokerConfig) -> Result<Self::Channel, QueueError>;
}
