use std::sync::Arc;
use std::time::Duration;
use kameo::Actor;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod actors;
mod codec;
mod config;
mod messaging;
mod metrics;
mod models;
mod pricing;
mod relay;
mod store;
mod utils;

use crate::actors::{report_health, HealthMonitorActor, HealthStatus, DATABASE};
use crate::config::{AppConfig, ObservabilityConfig};
use crate::metrics::{start_http_server, HttpState, Metrics};
use crate::relay::RelaySupervisor;
use crate::store::PgOrderStore;

const DATABASE_PROBE_INTERVAL: Duration = Duration::from_secs(30);

fn init_tracing(config: &ObservabilityConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.log_format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.observability);

    tracing::info!("🚀 Starting order relay");
    tracing::info!(
        inbound = %config.broker.inbound_queue,
        outbound = %config.broker.outbound_queue,
        brokers = %config.broker.brokers,
        "Relay configuration loaded"
    );

    // === 1. Metrics and health ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let health = HealthMonitorActor::spawn(HealthMonitorActor::new());

    // === 2. Order store (fail fast) ===
    let store = match PgOrderStore::connect(&config.database).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "❌ Order store unavailable, exiting");
            return Err(e.into());
        }
    };
    store.ensure_schema().await?;
    report_health(&health, DATABASE, HealthStatus::Healthy, None).await;

    // === 3. HTTP server ===
    let server = start_http_server(
        HttpState {
            metrics: metrics.clone(),
            health: health.clone(),
        },
        &config.server_addr(),
    )?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // === 4. Relay supervisor ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor = RelaySupervisor::new(
        config.broker.clone(),
        store.clone(),
        metrics.clone(),
        health.clone(),
    );
    let supervisor_task = tokio::spawn(supervisor.run(shutdown_rx.clone()));

    let probe_task = tokio::spawn(probe_database(store.clone(), health.clone(), shutdown_rx));

    tracing::info!("✅ Order relay running, press Ctrl+C to stop");

    // === 5. Graceful shutdown ===
    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown signal received");

    let _ = shutdown_tx.send(true);

    if let Err(e) = supervisor_task.await {
        tracing::error!(error = %e, "Relay supervisor task failed");
    }
    let _ = probe_task.await;

    server_handle.stop(true).await;
    if let Ok(Err(e)) = server_task.await {
        tracing::error!(error = %e, "HTTP server error");
    }

    store.close().await;

    tracing::info!("👋 Order relay stopped");
    Ok(())
}

/// Periodically report database reachability to the health monitor.
async fn probe_database(
    store: Arc<PgOrderStore>,
    health: kameo::actor::ActorRef<HealthMonitorActor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(DATABASE_PROBE_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let status = match store.ping().await {
                    Ok(()) => HealthStatus::Healthy,
                    Err(e) => {
                        tracing::warn!(error = %e, "Database probe failed");
                        HealthStatus::Unhealthy(e.to_string())
                    }
                };
                report_health(&health, DATABASE, status, None).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
