use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::QueueError;

/// Position of a delivery within the inbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// Broker-side acknowledgment of a delivery tag.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError>;
}

/// Single-use acknowledgment capability for one delivery.
///
/// `ack` consumes the capability, so a delivery cannot be acknowledged twice.
/// Dropping it without acknowledging leaves the message eligible for
/// redelivery.
pub struct Acker {
    tag: DeliveryTag,
    inner: Arc<dyn Acknowledge>,
}

impl Acker {
    pub fn new(tag: DeliveryTag, inner: Arc<dyn Acknowledge>) -> Self {
        Self { tag, inner }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.inner.ack(self.tag).await
    }
}

impl fmt::Debug for Acker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acker").field("tag", &self.tag).finish()
    }
}

/// A message handed to a consumer handler.
#[derive(Debug)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    pub acker: Acker,
}

impl Delivery {
    pub fn new(tag: DeliveryTag, payload: Vec<u8>, acknowledger: Arc<dyn Acknowledge>) -> Self {
        Self {
            tag,
            payload,
            acker: Acker::new(tag, acknowledger),
        }
    }
}
