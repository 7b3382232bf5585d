// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::{start_http_server, HttpState};

// ============================================================================
// Metrics Module - Prometheus metrics for the order relay
// ============================================================================
//
// Covers:
// - Inbound deliveries and their outcome per pipeline stage
// - Orders persisted and notifications published
// - Broker connection attempts and component health
//
// All metrics are registered with Prometheus and scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Pipeline
    pub messages_received: IntCounter,
    pub orders_persisted: IntCounter,
    pub notifications_published: IntCounter,
    pub pipeline_failures: IntCounterVec,
    pub processing_duration: Histogram,

    // Broker
    pub broker_connect_attempts: IntCounter,
    pub broker_health_status: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_received = IntCounter::new(
            "relay_messages_received_total",
            "Total inbound order messages received",
        )?;
        registry.register(Box::new(messages_received.clone()))?;

        let orders_persisted = IntCounter::new(
            "relay_orders_persisted_total",
            "Total orders written to the store",
        )?;
        registry.register(Box::new(orders_persisted.clone()))?;

        let notifications_published = IntCounter::new(
            "relay_notifications_published_total",
            "Total priced-order notifications published downstream",
        )?;
        registry.register(Box::new(notifications_published.clone()))?;

        let pipeline_failures = IntCounterVec::new(
            Opts::new("relay_pipeline_failures_total", "Pipeline failures by stage"),
            &["stage"],
        )?;
        registry.register(Box::new(pipeline_failures.clone()))?;

        let processing_duration = Histogram::with_opts(
            HistogramOpts::new("relay_processing_duration_seconds", "Per-message processing duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        let broker_connect_attempts = IntCounter::new(
            "relay_broker_connect_attempts_total",
            "Total broker connection attempts",
        )?;
        registry.register(Box::new(broker_connect_attempts.clone()))?;

        let broker_health_status = IntGauge::new(
            "relay_broker_health_status",
            "Broker health (0=Unhealthy, 1=Degraded, 2=Healthy)",
        )?;
        registry.register(Box::new(broker_health_status.clone()))?;

        Ok(Self {
            registry,
            messages_received,
            orders_persisted,
            notifications_published,
            pipeline_failures,
            processing_duration,
            broker_connect_attempts,
            broker_health_status,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_failure(&self, stage: &str) {
        self.pipeline_failures.with_label_values(&[stage]).inc();
    }
}
