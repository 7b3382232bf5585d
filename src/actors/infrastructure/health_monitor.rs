use kameo::Actor;
use kameo::Reply;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use serde::Serialize;
use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use crate::actors::core::{HealthStatus, ComponentHealth};

// ============================================================================
// Health Monitor Actor - Aggregates component health
// ============================================================================
//
// Components (database, broker) report their status here; the HTTP health
// endpoint reads the aggregate. The endpoint itself never fails because of a
// component being down.
//
// ============================================================================

pub const DATABASE: &str = "database";
pub const BROKER: &str = "broker";

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize, Reply)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

#[derive(Default)]
pub struct HealthMonitorActor {
    components: BTreeMap<String, ComponentHealth>,
}

impl HealthMonitorActor {
    pub fn new() -> Self {
        Self::default()
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(_) => {
                    has_degraded = true;
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(
        state: Self::Args,
        _actor_ref: ActorRef<Self>
    ) -> Result<Self, Self::Error> {
        tracing::info!("HealthMonitorActor started");
        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        tracing::debug!(
            component = %msg.component,
            status = ?msg.status,
            "Updated component health"
        );

        let health = ComponentHealth::new(msg.component.clone(), msg.status)
            .with_details(msg.details);
        self.components.insert(msg.component, health);
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}

/// Report a component status, logging instead of failing if the monitor is gone.
pub async fn report_health(
    monitor: &ActorRef<HealthMonitorActor>,
    component: &str,
    status: HealthStatus,
    details: Option<String>,
) {
    let update = UpdateHealth {
        component: component.to_string(),
        status,
        details,
    };

    if let Err(e) = monitor.ask(update).await {
        tracing::warn!(component = %component, error = %e, "Failed to report component health");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_monitor_is_healthy() {
        let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new());
        let health = monitor.ask(GetSystemHealth).await.unwrap();

        assert_eq!(health.overall_status, HealthStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_aggregates_worst_status() {
        let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new());

        report_health(&monitor, DATABASE, HealthStatus::Healthy, None).await;
        report_health(
            &monitor,
            BROKER,
            HealthStatus::Degraded("connecting".into()),
            Some("attempt 2".into()),
        )
        .await;

        let health = monitor.ask(GetSystemHealth).await.unwrap();
        assert!(matches!(health.overall_status, HealthStatus::Degraded(_)));
        assert_eq!(health.components[BROKER].details.as_deref(), Some("attempt 2"));

        report_health(&monitor, BROKER, HealthStatus::Unhealthy("gave up".into()), None).await;

        let health = monitor.ask(GetSystemHealth).await.unwrap();
        assert_eq!(
            health.overall_status,
            HealthStatus::Unhealthy("broker: gave up".to_string())
        );
        assert_eq!(health.components.len(), 2);
    }
}
