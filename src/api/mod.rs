//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod presence;
mod routes;

pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use presence::{presence, PresenceResponse};
pub use routes::api_routes;
