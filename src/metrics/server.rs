use actix_web::dev::Server;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use kameo::actor::ActorRef;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::actors::{GetSystemHealth, HealthMonitorActor};
use super::Metrics;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub metrics: Arc<Metrics>,
    pub health: ActorRef<HealthMonitorActor>,
}

/// Build the HTTP server exposing /health and /metrics.
///
/// The returned server must be spawned or awaited by the caller; its handle
/// is used for graceful shutdown.
pub fn start_http_server(state: HttpState, addr: &str) -> std::io::Result<Server> {
    tracing::info!("📊 Starting HTTP server on http://{}", addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(addr)?
    .run();

    Ok(server)
}

async fn metrics_handler(state: web::Data<HttpState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

/// Liveness: always 200, component health is informational.
async fn health_handler(state: web::Data<HttpState>) -> impl Responder {
    match state.health.ask(GetSystemHealth).await {
        Ok(health) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "order-relay",
            "healthy": health.overall_status.is_healthy(),
            "overall": health.overall_status,
            "components": health.components,
            "checked_at": health.check_time,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Health monitor unavailable");
            HttpResponse::Ok().json(serde_json::json!({
                "status": "ok",
                "service": "order-relay",
            }))
        }
    }
}
