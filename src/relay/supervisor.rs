use kameo::actor::ActorRef;
use std::sync::Arc;
use tokio::sync::watch;

use crate::actors::{report_health, HealthMonitorActor, HealthStatus, BROKER};
use crate::config::BrokerConfig;
use crate::messaging::{Connector, Consume, KafkaConnector, QueueError};
use crate::metrics::Metrics;
use crate::store::OrderStore;
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

use super::OrderRelay;

// ============================================================================
// Relay Supervisor - Broker session lifecycle
// ============================================================================
//
// CONNECTING → CONSUMING → (channel lost) → CONNECTING → ...
//
// Connecting covers connect, open channel and declare every queue, retried
// with bounded exponential backoff. When the attempts run out the broker is
// reported unhealthy and consumption never starts; the process keeps serving
// /health so operators can see why.
//
// ============================================================================

pub struct RelaySupervisor<S, C = KafkaConnector> {
    connector: C,
    config: BrokerConfig,
    store: Arc<S>,
    metrics: Arc<Metrics>,
    health: ActorRef<HealthMonitorActor>,
}

impl<S> RelaySupervisor<S, KafkaConnector>
where
    S: OrderStore + 'static,
{
    pub fn new(
        config: BrokerConfig,
        store: Arc<S>,
        metrics: Arc<Metrics>,
        health: ActorRef<HealthMonitorActor>,
    ) -> Self {
        Self::with_connector(KafkaConnector, config, store, metrics, health)
    }
}

impl<S, C> RelaySupervisor<S, C>
where
    S: OrderStore + 'static,
    C: Connector,
{
    pub fn with_connector(
        connector: C,
        config: BrokerConfig,
        store: Arc<S>,
        metrics: Arc<Metrics>,
        health: ActorRef<HealthMonitorActor>,
    ) -> Self {
        Self {
            connector,
            config,
            store,
            metrics,
            health,
        }
    }

    /// Drive the broker session until shutdown or until reconnecting gives up.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let retry: RetryConfig = (&self.config.reconnect).into();
        let mut sessions = 0u64;

        loop {
            self.set_broker_health(HealthStatus::Degraded("connecting".to_string()), None)
                .await;

            let channel = match retry_with_backoff(&retry, &mut shutdown, |attempt| {
                self.establish(attempt)
            })
            .await
            {
                RetryResult::Success(channel) => Arc::new(channel),
                RetryResult::Failed(e) => {
                    tracing::error!(
                        brokers = %self.config.brokers,
                        max_attempts = retry.max_attempts,
                        error = %e,
                        "❌ Broker unreachable, giving up: consumption will not start"
                    );
                    self.set_broker_health(
                        HealthStatus::Unhealthy(e.to_string()),
                        Some(format!("gave up after {} attempts", retry.max_attempts)),
                    )
                    .await;
                    return;
                }
                RetryResult::Cancelled => {
                    tracing::info!("Shutdown requested before broker session was established");
                    return;
                }
            };

            sessions += 1;
            self.set_broker_health(HealthStatus::Healthy, Some(format!("session {sessions}")))
                .await;

            let relay = Arc::new(OrderRelay::new(
                self.store.clone(),
                channel.clone(),
                self.config.outbound_queue.clone(),
                self.metrics.clone(),
            ));

            let consumed = channel
                .consume(&self.config.inbound_queue, shutdown.clone(), move |delivery| {
                    let relay = relay.clone();
                    async move { relay.handle(delivery).await }
                })
                .await;

            match consumed {
                Ok(()) => {
                    tracing::info!("🛑 Relay supervisor stopped");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        session = sessions,
                        "⚠️ Broker channel lost, reconnecting"
                    );
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn establish(&self, attempt: u32) -> Result<C::Channel, QueueError> {
        self.metrics.broker_connect_attempts.inc();
        tracing::info!(attempt = attempt, brokers = %self.config.brokers, "Establishing broker session");

        self.connector.establish(&self.config).await
    }

    async fn set_broker_health(&self, status: HealthStatus, details: Option<String>) {
        self.metrics.broker_health_status.set(status.as_gauge());
        report_health(&self.health, BROKER, status, details).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::GetSystemHealth;
    use crate::config::ReconnectConfig;
    use crate::messaging::{Delivery, DeliveryTag, Publisher};
    use crate::relay::testing::{MemoryStore, RecordingAcker, RecordingPublisher};
    use async_trait::async_trait;
    use kameo::Actor;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// One broker session: hands out its orders, then either loses the
    /// channel or waits for shutdown.
    struct ScriptedChannel {
        order_ids: Vec<&'static str>,
        lose_channel: bool,
        acker: Arc<RecordingAcker>,
        publisher: Arc<RecordingPublisher>,
    }

    #[async_trait]
    impl Consume for ScriptedChannel {
        async fn consume<F, Fut>(
            &self,
            _queue: &str,
            mut shutdown: watch::Receiver<bool>,
            mut handler: F,
        ) -> Result<(), QueueError>
        where
            F: FnMut(Delivery) -> Fut + Send + 'static,
            Fut: Future<Output = ()> + Send + 'static,
        {
            for (offset, order_id) in self.order_ids.iter().enumerate() {
                let payload = json!({
                    "products": [{"id": "a", "price": 10}, {"id": "b", "price": 5}],
                    "username": "alice",
                    "orderId": order_id
                });
                let tag = DeliveryTag { partition: 0, offset: offset as i64 };
                handler(Delivery::new(tag, serde_json::to_vec(&payload).unwrap(), self.acker.clone())).await;
            }

            if self.lose_channel {
                return Err(QueueError::Channel("connection reset".to_string()));
            }

            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Publisher for ScriptedChannel {
        async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
            self.publisher.publish(queue, payload).await
        }
    }

    struct ScriptedConnector {
        sessions: Mutex<VecDeque<ScriptedChannel>>,
        established: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Channel = ScriptedChannel;

        async fn establish(&self, _config: &BrokerConfig) -> Result<ScriptedChannel, QueueError> {
            self.established.fetch_add(1, Ordering::SeqCst);
            self.sessions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| QueueError::Connection("broker gone".to_string()))
        }
    }

    fn unreachable_broker(max_attempts: u32) -> BrokerConfig {
        BrokerConfig {
            brokers: "127.0.0.1:1".to_string(),
            connect_timeout_ms: 200,
            reconnect: ReconnectConfig {
                max_attempts,
                initial_delay_ms: 10,
                max_delay_ms: 20,
                multiplier: 2.0,
                jitter: 0.0,
            },
            ..Default::default()
        }
    }

    fn supervisor(config: BrokerConfig) -> (RelaySupervisor<MemoryStore>, Arc<Metrics>, ActorRef<HealthMonitorActor>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let health = HealthMonitorActor::spawn(HealthMonitorActor::new());
        let supervisor = RelaySupervisor::new(
            config,
            Arc::new(MemoryStore::default()),
            metrics.clone(),
            health.clone(),
        );
        (supervisor, metrics, health)
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (supervisor, metrics, health) = supervisor(unreachable_broker(2));
        let (_tx, rx) = watch::channel(false);

        tokio::time::timeout(Duration::from_secs(30), supervisor.run(rx))
            .await
            .expect("supervisor should stop once attempts are exhausted");

        assert_eq!(metrics.broker_connect_attempts.get(), 2);
        assert_eq!(metrics.broker_health_status.get(), 0);

        let system = health.ask(GetSystemHealth).await.unwrap();
        assert!(matches!(system.components[BROKER].status, HealthStatus::Unhealthy(_)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_reconnect() {
        let mut config = unreachable_broker(1_000);
        config.reconnect.initial_delay_ms = 60_000;
        config.reconnect.max_delay_ms = 60_000;
        let (supervisor, metrics, _health) = supervisor(config);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(supervisor.run(rx));
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor should stop on shutdown")
            .unwrap();

        assert_eq!(metrics.broker_connect_attempts.get(), 1);
    }

    #[tokio::test]
    async fn test_lost_channel_reconnects_and_keeps_relaying() {
        let acker = Arc::new(RecordingAcker::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let established = Arc::new(AtomicU32::new(0));
        let session = |order_ids, lose_channel| ScriptedChannel {
            order_ids,
            lose_channel,
            acker: acker.clone(),
            publisher: publisher.clone(),
        };

        let connector = ScriptedConnector {
            sessions: Mutex::new(VecDeque::from([
                session(vec!["o1"], true),
                session(vec!["o2"], false),
            ])),
            established: established.clone(),
        };

        let store = Arc::new(MemoryStore::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let health = HealthMonitorActor::spawn(HealthMonitorActor::new());
        let supervisor = RelaySupervisor::with_connector(
            connector,
            unreachable_broker(3),
            store.clone(),
            metrics.clone(),
            health.clone(),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(supervisor.run(rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.orders().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("both sessions should relay their order");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor should stop on shutdown")
            .unwrap();

        assert_eq!(established.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.broker_connect_attempts.get(), 2);
        assert_eq!(acker.acked().len(), 2);

        let published: Vec<serde_json::Value> = publisher
            .published()
            .iter()
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0]["orderId"], "o1");
        assert_eq!(published[1]["orderId"], "o2");

        let system = health.ask(GetSystemHealth).await.unwrap();
        assert_eq!(system.components[BROKER].status, HealthStatus::Healthy);
        assert_eq!(system.components[BROKER].details.as_deref(), Some("session 2"));
    }
}
