//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a request may be replayed against another instance
//! - Limit replays to a single extra attempt per request
//!
//! # Design Decisions
//! - Only safe methods (GET, HEAD, OPTIONS, TRACE) are replayed
//! - PUT and DELETE are idempotent but still have side effects; never replayed
//! - Only transport failures and timeouts trigger a retry, never an HTTP status

use axum::http::Method;

use crate::config::RetryConfig;

/// Decides whether a failed upstream attempt may be repeated.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    enabled: bool,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self { enabled: config.enabled }
    }

    /// Upper bound on upstream attempts for a request with `method`.
    pub fn max_attempts(&self, method: &Method) -> u32 {
        if self.enabled && is_retryable(method) {
            2
        } else {
            1
        }
    }
}

/// Safe methods can be sent twice without observable side effects.
pub fn is_retryable(method: &Method) -> bool {
    method.is_safe()
}
