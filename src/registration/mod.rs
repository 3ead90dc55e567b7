//! Service-side registration subsystem.
//!
//! # Data Flow
//! ```text
//! Process start → RegistrationManager::run
//!     → register (backoff on outage)
//!     → heartbeat loop (ServiceHealth → report_health)
//!     → shutdown signal → deregister (bounded by deadline)
//!
//! Registry health checker → GET /health → ServiceHealth
//! ```

pub mod health;
pub mod manager;

pub use health::{health_router, ServiceHealth};
pub use manager::{release_after_serve, RegistrationManager, RegistrationState};
