// handlers/public/mod.rs - Public handlers (no authentication required)
//
// Diagnostics are served without a token so load balancers and operators
// can poll them.
pub mod health;

pub use health::{health_report, service_health};
