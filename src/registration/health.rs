//! Service health endpoint.
//!
//! The registry polls this endpoint on its own schedule; nothing in the
//! gateway calls it. The same flag feeds the heartbeat reported by the
//! registration manager, so both checks always agree.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::registry::HealthStatus;

/// Shared health flag of a running service.
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    healthy: Arc<AtomicBool>,
}

impl ServiceHealth {
    /// Starts healthy.
    pub fn new() -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        let previous = self.healthy.swap(healthy, Ordering::SeqCst);
        if previous != healthy {
            tracing::info!(healthy, "Service health changed");
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Status to report on the heartbeat check.
    pub fn status(&self) -> HealthStatus {
        if self.is_healthy() {
            HealthStatus::Passing
        } else {
            HealthStatus::Critical
        }
    }
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Router serving `GET {path}`: 200 while healthy, 503 otherwise.
pub fn health_router(path: &str, health: ServiceHealth) -> Router {
    Router::new().route(path, get(health_check)).with_state(health)
}

async fn health_check(State(health): State<ServiceHealth>) -> (StatusCode, &'static str) {
    if health.is_healthy() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn probe(router: Router) -> StatusCode {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        router.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_endpoint_follows_flag() {
        let health = ServiceHealth::new();
        assert_eq!(probe(health_router("/health", health.clone())).await, StatusCode::OK);

        health.set_healthy(false);
        assert_eq!(health.status(), HealthStatus::Critical);
        assert_eq!(
            probe(health_router("/health", health.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
