use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use super::{Acknowledge, Delivery, DeliveryTag, OffsetTracker, Publisher, QueueError};

// ============================================================================
// Consume Loop
// ============================================================================
//
// pull → record in tracker → spawn handler → await → settle
//
// Deliveries are handled one at a time. Once the handler task finishes, the
// tracker tells whether it acknowledged. An unacknowledged delivery is
// rewound and read again after `redelivery_delay`, up to `max_redeliveries`
// times. After that it is copied to the dead-letter queue and acknowledged,
// so the commit point moves past it and nothing acknowledged after it is
// ever replayed.
//
// ============================================================================

/// A message pulled from the source, before it gets its ack capability.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
}

/// Ordered message stream of one subscribed queue.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    async fn next(&self) -> Result<RawMessage, QueueError>;

    /// Commit the partition up to (excluding) `next_offset`.
    fn commit(&self, partition: i32, next_offset: i64) -> Result<(), QueueError>;

    /// Make `tag` the next message read from its partition.
    fn rewind(&self, tag: DeliveryTag) -> Result<(), QueueError>;
}

#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    pub max_redeliveries: u32,
    pub redelivery_delay: Duration,
    pub dead_letter_queue: String,
}

/// Acknowledges through the tracker: the commit is sent first and the offset
/// only leaves the pending set once the commit went through.
struct TrackingAcknowledger<M> {
    source: Arc<M>,
    tracker: Arc<Mutex<OffsetTracker>>,
}

#[async_trait]
impl<M: MessageSource> Acknowledge for TrackingAcknowledger<M> {
    async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError> {
        let mut tracker = self.tracker.lock().await;

        if let Some(next_offset) = tracker.commit_point(tag.partition, tag.offset) {
            self.source
                .commit(tag.partition, next_offset)
                .map_err(|e| QueueError::Ack {
                    tag: tag.to_string(),
                    reason: e.to_string(),
                })?;

            tracing::debug!(partition = tag.partition, committed = next_offset, "Committed offset");
        }

        tracker.acknowledge(tag.partition, tag.offset);
        Ok(())
    }
}

pub struct ConsumeLoop<M> {
    source: Arc<M>,
    tracker: Arc<Mutex<OffsetTracker>>,
    acknowledger: Arc<dyn Acknowledge>,
    dead_letter: Arc<dyn Publisher>,
    policy: RedeliveryPolicy,
    max_consecutive_errors: u32,
}

impl<M: MessageSource> ConsumeLoop<M> {
    pub fn new(
        source: Arc<M>,
        tracker: Arc<Mutex<OffsetTracker>>,
        dead_letter: Arc<dyn Publisher>,
        policy: RedeliveryPolicy,
        max_consecutive_errors: u32,
    ) -> Self {
        let acknowledger = Arc::new(TrackingAcknowledger {
            source: source.clone(),
            tracker: tracker.clone(),
        });

        Self {
            source,
            tracker,
            acknowledger,
            dead_letter,
            policy,
            max_consecutive_errors: max_consecutive_errors.max(1),
        }
    }

    /// Run until shutdown (`Ok`) or until the source is considered lost.
    ///
    /// A handler that panics is logged and its delivery treated as
    /// unacknowledged.
    pub async fn run<F, Fut>(
        &self,
        queue: &str,
        mut shutdown: watch::Receiver<bool>,
        mut handler: F,
    ) -> Result<(), QueueError>
    where
        F: FnMut(Delivery) -> Fut + Send,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(queue = %queue, "📥 Consuming from queue");

        let mut consecutive_errors = 0u32;

        loop {
            let message = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(queue = %queue, "Shutdown requested, consume loop exiting");
                        return Ok(());
                    }
                    continue;
                }

                received = self.source.next() => match received {
                    Ok(message) => {
                        consecutive_errors = 0;
                        message
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        tracing::warn!(
                            error = %e,
                            consecutive_errors = consecutive_errors,
                            "Error receiving from broker"
                        );
                        if consecutive_errors >= self.max_consecutive_errors {
                            return Err(QueueError::Channel(format!(
                                "{consecutive_errors} consecutive receive errors, last: {e}"
                            )));
                        }
                        continue;
                    }
                }
            };

            let tag = message.tag;
            let attempt = self.tracker.lock().await.delivered(tag.partition, tag.offset);

            tracing::debug!(queue = %queue, delivery = %tag, attempt = attempt, "Received delivery");

            let delivery = Delivery::new(tag, message.payload.clone(), self.acknowledger.clone());
            if let Err(e) = tokio::spawn(handler(delivery)).await {
                tracing::error!(
                    error = %e,
                    delivery = %tag,
                    "Delivery handler panicked, message left unacknowledged"
                );
            }

            if self.tracker.lock().await.is_pending(tag.partition, tag.offset) {
                self.settle_unacknowledged(message, attempt).await?;
            }
        }
    }

    async fn settle_unacknowledged(&self, message: RawMessage, attempt: u32) -> Result<(), QueueError> {
        let tag = message.tag;

        if attempt <= self.policy.max_redeliveries {
            tracing::warn!(
                delivery = %tag,
                attempt = attempt,
                max_redeliveries = self.policy.max_redeliveries,
                "Delivery not acknowledged, redelivering"
            );
            tokio::time::sleep(self.policy.redelivery_delay).await;
            return self.source.rewind(tag);
        }

        match self
            .dead_letter
            .publish(&self.policy.dead_letter_queue, &message.payload)
            .await
        {
            Ok(()) => {
                tracing::error!(
                    delivery = %tag,
                    attempts = attempt,
                    dead_letter_queue = %self.policy.dead_letter_queue,
                    "💀 Delivery moved to dead-letter queue"
                );
                self.acknowledger.ack(tag).await
            }
            Err(e) => {
                tracing::error!(
                    delivery = %tag,
                    error = %e,
                    "Dead-lettering failed, delivery stays unacknowledged"
                );
                tokio::time::sleep(self.policy.redelivery_delay).await;
                self.source.rewind(tag)
            }
        }
    }
}
