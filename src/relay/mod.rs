// ============================================================================
// Order Relay - Per-delivery pipeline
// ============================================================================
//
// RECEIVED → DECODED → PRICED → PERSISTED → ACKED → FORWARDED
//
// Any error before ACKED leaves the delivery unacknowledged: the consume loop
// reads it again, and dead-letters it once redeliveries run out. A publish
// failure after ACKED is only logged: the order is stored but the downstream
// notification is lost.
//
// There is no rollback: a crash between PERSISTED and ACKED stores the order
// again on redelivery.
//
// ============================================================================

mod supervisor;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::codec::{decode_order_request, encode_notification, CodecError};
use crate::messaging::{Delivery, Publisher, QueueError};
use crate::metrics::Metrics;
use crate::models::{NewOrder, PricedOrderNotification};
use crate::store::{OrderStore, StoreError};

pub use supervisor::RelaySupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    Received,
    Decoded,
    Priced,
    Persisted,
    Acked,
    Forwarded,
}

impl RelayStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStage::Received => "received",
            RelayStage::Decoded => "decoded",
            RelayStage::Priced => "priced",
            RelayStage::Persisted => "persisted",
            RelayStage::Acked => "acked",
            RelayStage::Forwarded => "forwarded",
        }
    }
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal FAILED state, tagged with the last stage reached.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("decode failed: {0}")]
    Decode(#[source] CodecError),

    #[error("persist failed: {0}")]
    Persist(#[source] StoreError),

    #[error("acknowledge failed: {0}")]
    Ack(#[source] QueueError),
}

impl RelayError {
    /// Stage the delivery had reached when it failed.
    pub fn stage(&self) -> RelayStage {
        match self {
            RelayError::Decode(_) => RelayStage::Received,
            RelayError::Persist(_) => RelayStage::Priced,
            RelayError::Ack(_) => RelayStage::Persisted,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            RelayError::Decode(_) => "decode",
            RelayError::Persist(_) => "persist",
            RelayError::Ack(_) => "ack",
        }
    }
}

/// Result of a delivery that got past acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    pub record_id: Uuid,
    pub order_id: Value,
    pub total_price: f64,
    /// Last stage reached: `Forwarded`, or `Acked` if the publish was lost.
    pub stage: RelayStage,
}

impl RelayOutcome {
    pub fn forwarded(&self) -> bool {
        self.stage == RelayStage::Forwarded
    }
}

pub struct OrderRelay<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    outbound_queue: String,
    metrics: Arc<Metrics>,
}

impl<S, P> OrderRelay<S, P>
where
    S: OrderStore,
    P: Publisher,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>, outbound_queue: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            publisher,
            outbound_queue: outbound_queue.into(),
            metrics,
        }
    }

    /// Consumer-loop entry point: run the pipeline and log the outcome.
    ///
    /// Errors stop here so the consume loop keeps running.
    pub async fn handle(&self, delivery: Delivery) {
        let tag = delivery.tag;
        let started = Instant::now();

        match self.process(delivery).await {
            Ok(outcome) => {
                tracing::info!(
                    delivery = %tag,
                    record_id = %outcome.record_id,
                    order_id = %outcome.order_id,
                    total_price = outcome.total_price,
                    stage = %outcome.stage,
                    "✅ Order relayed"
                );
            }
            Err(e) => {
                self.metrics.record_failure(e.metric_label());
                tracing::error!(
                    delivery = %tag,
                    stage = %e.stage(),
                    error = %e,
                    "❌ Order relay failed, delivery left unacknowledged"
                );
            }
        }

        self.metrics
            .processing_duration
            .observe(started.elapsed().as_secs_f64());
    }

    /// Run one delivery through decode, price, persist, ack and forward.
    pub async fn process(&self, delivery: Delivery) -> Result<RelayOutcome, RelayError> {
        let Delivery { tag, payload, acker } = delivery;
        self.metrics.messages_received.inc();

        let request = decode_order_request(&payload).map_err(RelayError::Decode)?;
        tracing::debug!(
            delivery = %tag,
            stage = %RelayStage::Decoded,
            order_id = %request.order_id,
            user = %request.username,
            products = request.products.len(),
            "Decoded order request"
        );

        let new_order = NewOrder::new(request.username, request.products);
        tracing::debug!(
            delivery = %tag,
            stage = %RelayStage::Priced,
            total_price = new_order.total_price(),
            "Priced order"
        );

        let order = self
            .store
            .create_order(new_order)
            .await
            .map_err(RelayError::Persist)?;
        self.metrics.orders_persisted.inc();

        acker.ack().await.map_err(RelayError::Ack)?;
        tracing::debug!(delivery = %tag, record_id = %order.id(), "Delivery acknowledged");

        let mut outcome = RelayOutcome {
            record_id: order.id(),
            order_id: request.order_id.clone(),
            total_price: order.total_price(),
            stage: RelayStage::Acked,
        };

        let notification = PricedOrderNotification::for_order(request.order_id, &order);
        let published = match encode_notification(&notification) {
            Ok(payload) => self
                .publisher
                .publish(&self.outbound_queue, &payload)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match published {
            Ok(()) => {
                self.metrics.notifications_published.inc();
                outcome.stage = RelayStage::Forwarded;
            }
            Err(reason) => {
                // Already acknowledged: nothing left to retry from here
                self.metrics.record_failure("publish");
                tracing::error!(
                    delivery = %tag,
                    record_id = %order.id(),
                    order_id = %outcome.order_id,
                    queue = %self.outbound_queue,
                    error = %reason,
                    "Order stored but notification was not published"
                );
            }
        }

        Ok(outcome)
    }
}

// ============================================================================
// Test doubles shared by relay and supervisor tests
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    use crate::messaging::{Acknowledge, Delivery, DeliveryTag, Publisher, QueueError};
    use crate::models::{NewOrder, Order};
    use crate::store::{OrderStore, StoreError};

    #[derive(Default)]
    pub struct MemoryStore {
        pub orders: Mutex<Vec<Order>>,
        pub unreachable: bool,
    }

    impl MemoryStore {
        pub fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Default::default()
            }
        }

        pub fn orders(&self) -> Vec<Order> {
            self.orders.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderStore for MemoryStore {
        async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError> {
            if self.unreachable {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            let order = Order::persisted(Uuid::now_v7(), Utc::now(), order);
            self.orders.lock().unwrap().push(order.clone());
            Ok(order)
        }
    }

    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
        pub failing: bool,
    }

    impl RecordingPublisher {
        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Default::default()
            }
        }

        pub fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
            if self.failing {
                return Err(QueueError::Publish {
                    queue: queue.to_string(),
                    reason: "channel closed".to_string(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((queue.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingAcker {
        pub acked: Mutex<Vec<DeliveryTag>>,
        pub failing: bool,
    }

    impl RecordingAcker {
        pub fn acked(&self) -> Vec<DeliveryTag> {
            self.acked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Acknowledge for RecordingAcker {
        async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError> {
            if self.failing {
                return Err(QueueError::Ack {
                    tag: tag.to_string(),
                    reason: "channel closed".to_string(),
                });
            }
            self.acked.lock().unwrap().push(tag);
            Ok(())
        }
    }

    pub fn delivery(offset: i64, payload: serde_json::Value, acker: &Arc<RecordingAcker>) -> Delivery {
        Delivery::new(
            DeliveryTag { partition: 0, offset },
            serde_json::to_vec(&payload).unwrap(),
            acker.clone(),
        )
    }
}
