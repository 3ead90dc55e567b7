//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (service, instance_id, request_id) over formatted text
//! - Request ID flows from the listener to the upstream instance
//! - Metrics are cheap (atomic operations behind the facade)

pub mod logging;
pub mod metrics;
