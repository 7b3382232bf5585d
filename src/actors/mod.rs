// ============================================================================
// Actors Module
// ============================================================================
//
// Actors are reserved for infrastructure concerns. The relay pipeline itself
// is plain async code driven by the supervisor.
//
// Structure:
// - core/           - Health types shared by reporters and the endpoint
// - infrastructure/ - HealthMonitorActor
//
// ============================================================================

mod core;
mod infrastructure;

pub use core::HealthStatus;
pub use infrastructure::{report_health, GetSystemHealth, HealthMonitorActor, BROKER, DATABASE};
