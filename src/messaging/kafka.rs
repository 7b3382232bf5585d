use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::config::BrokerConfig;
use super::consumer::{ConsumeLoop, MessageSource, RawMessage, RedeliveryPolicy};
use super::{Connector, Consume, Delivery, DeliveryTag, OffsetTracker, Publisher, QueueError};

// ============================================================================
// Kafka / Redpanda Binding
// ============================================================================
//
// Connection: producer + admin client, verified with a metadata round-trip
// Channel:    consumer with manual commits, plus the connection's producer
//
// Queues map to topics. Declaring an existing topic is a no-op.
// Unacknowledged deliveries are re-read with a seek; see `consumer.rs`.
//
// ============================================================================

fn client_config(config: &BrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.brokers);
    client
}

/// Established broker session. Owned by the supervisor, never global.
pub struct Connection {
    config: BrokerConfig,
    producer: FutureProducer,
    admin: Arc<AdminClient<DefaultClientContext>>,
}

impl Connection {
    /// Connect to the broker and confirm it answers a metadata request.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, QueueError> {
        tracing::info!(brokers = %config.brokers, "Connecting to broker...");

        let producer: FutureProducer = client_config(config)
            .set("message.timeout.ms", config.publish_timeout_ms.to_string())
            .create()
            .map_err(|e| QueueError::Connection(format!("failed to create producer: {e}")))?;

        let admin: AdminClient<DefaultClientContext> = client_config(config)
            .create()
            .map_err(|e| QueueError::Connection(format!("failed to create admin client: {e}")))?;

        // fetch_metadata blocks the calling thread
        let probe = producer.clone();
        let timeout = config.connect_timeout();
        let broker_count = tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| QueueError::Connection(format!("metadata probe aborted: {e}")))?
        .map_err(|e| QueueError::Connection(e.to_string()))?;

        if broker_count == 0 {
            return Err(QueueError::Connection(format!(
                "no brokers reachable at {}",
                config.brokers
            )));
        }

        tracing::info!(
            brokers = %config.brokers,
            broker_count = broker_count,
            "✅ Connected to broker"
        );

        Ok(Self {
            config: config.clone(),
            producer,
            admin: Arc::new(admin),
        })
    }

    /// Open a consuming channel on this connection.
    pub fn open_channel(&self) -> Result<Channel, QueueError> {
        let consumer: StreamConsumer = client_config(&self.config)
            .set("group.id", &self.config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| QueueError::Channel(format!("failed to create consumer: {e}")))?;

        tracing::debug!(group_id = %self.config.consumer_group, "Channel opened");

        Ok(Channel {
            consumer: Arc::new(consumer),
            publisher: Arc::new(KafkaPublisher {
                producer: self.producer.clone(),
                timeout: self.config.publish_timeout(),
            }),
            admin: self.admin.clone(),
            tracker: Arc::new(Mutex::new(OffsetTracker::new())),
            operation_timeout: self.config.connect_timeout(),
            redelivery: RedeliveryPolicy {
                max_redeliveries: self.config.max_redeliveries,
                redelivery_delay: self.config.redelivery_delay(),
                dead_letter_queue: self.config.dead_letter_queue.clone(),
            },
            max_consecutive_errors: self.config.max_consecutive_errors,
        })
    }
}

pub struct Channel {
    consumer: Arc<StreamConsumer>,
    publisher: Arc<KafkaPublisher>,
    admin: Arc<AdminClient<DefaultClientContext>>,
    tracker: Arc<Mutex<OffsetTracker>>,
    operation_timeout: Duration,
    redelivery: RedeliveryPolicy,
    max_consecutive_errors: u32,
}

impl Channel {
    /// Ensure the queue exists. Safe to call repeatedly.
    pub async fn declare_queue(&self, name: &str) -> Result<(), QueueError> {
        let topic = NewTopic::new(name, 1, TopicReplication::Fixed(1));
        let options = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = self
            .admin
            .create_topics(&[topic], &options)
            .await
            .map_err(|e| QueueError::Declare {
                queue: name.to_string(),
                reason: e.to_string(),
            })?;

        for result in results {
            match result {
                Ok(created) => tracing::info!(queue = %created, "Queue created"),
                Err((existing, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(queue = %existing, "Queue already exists")
                }
                Err((queue, code)) => {
                    return Err(QueueError::Declare {
                        queue,
                        reason: code.to_string(),
                    })
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Consume for Channel {
    /// Consume `queue` until shutdown or until the channel is lost.
    ///
    /// Returns `Ok` on shutdown and `Channel` once `max_consecutive_errors`
    /// receive errors happen in a row.
    async fn consume<F, Fut>(
        &self,
        queue: &str,
        shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<(), QueueError>
    where
        F: FnMut(Delivery) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.consumer
            .subscribe(&[queue])
            .map_err(|e| QueueError::Channel(format!("failed to subscribe to {queue}: {e}")))?;

        let source = Arc::new(KafkaSource {
            consumer: self.consumer.clone(),
            topic: queue.to_string(),
            seek_timeout: self.operation_timeout,
        });

        let consumed = ConsumeLoop::new(
            source,
            self.tracker.clone(),
            self.publisher.clone(),
            self.redelivery.clone(),
            self.max_consecutive_errors,
        )
        .run(queue, shutdown, handler)
        .await;

        self.consumer.unsubscribe();
        consumed
    }
}

#[async_trait]
impl Publisher for Channel {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        self.publisher.publish(queue, payload).await
    }
}

/// Producer shared by a connection's channels.
struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        let record = FutureRecord::<(), [u8]>::to(queue).payload(payload);

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| QueueError::Publish {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(queue = %queue, bytes = payload.len(), "Published message");
        Ok(())
    }
}

/// Subscribed topic read through the channel's consumer.
struct KafkaSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
    seek_timeout: Duration,
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn next(&self) -> Result<RawMessage, QueueError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| QueueError::Channel(e.to_string()))?;

        Ok(RawMessage {
            tag: DeliveryTag {
                partition: message.partition(),
                offset: message.offset(),
            },
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    fn commit(&self, partition: i32, next_offset: i64) -> Result<(), QueueError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, partition, Offset::Offset(next_offset))
            .map_err(|e| QueueError::Channel(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| QueueError::Channel(e.to_string()))
    }

    fn rewind(&self, tag: DeliveryTag) -> Result<(), QueueError> {
        self.consumer
            .seek(&self.topic, tag.partition, Offset::Offset(tag.offset), self.seek_timeout)
            .map_err(|e| QueueError::Channel(format!("failed to rewind to {tag}: {e}")))
    }
}

/// Opens Kafka sessions: connect, open a channel, declare every queue.
pub struct KafkaConnector;

#[async_trait]
impl Connector for KafkaConnector {
    type Channel = Channel;

    async fn establish(&self, config: &BrokerConfig) -> Result<Channel, QueueError> {
        let connection = Connection::connect(config).await?;
        let channel = connection.open_channel()?;

        for queue in [
            &config.inbound_queue,
            &config.outbound_queue,
            &config.dead_letter_queue,
        ] {
            channel.declare_queue(queue).await?;
        }

        tracing::info!(
            inbound = %config.inbound_queue,
            outbound = %config.outbound_queue,
            dead_letter = %config.dead_letter_queue,
            "Queues declared"
        );

        Ok(channel)
    }
}
