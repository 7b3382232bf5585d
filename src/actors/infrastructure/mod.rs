// ============================================================================
// Infrastructure Actors
// ============================================================================

mod health_monitor;

pub use health_monitor::{report_health, GetSystemHealth, HealthMonitorActor, BROKER, DATABASE};
