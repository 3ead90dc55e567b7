//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway request to an instance:
//!     → per-attempt timeout (tokio::time::timeout in the forwarder)
//!     → On transport failure: retries.rs (safe method? one more instance)
//!
//! Service registration:
//!     → On registry failure: backoff.rs (capped exponential delay + jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for safe requests (GET, HEAD, etc.)
//! - Jittered backoff prevents thundering herd on registry recovery

pub mod backoff;
pub mod retries;

pub use backoff::calculate_backoff;
pub use retries::{is_retryable, RetryPolicy};
