//! Observability: health probes and the status endpoint.

mod health;

pub use health::{health_router, status_router, HealthState};
