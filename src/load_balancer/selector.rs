//! Instance selection over a registry snapshot.
//!
//! # Responsibilities
//! - Filter a service's cached instances to healthy ones
//! - Delegate the choice to the configured policy
//! - Distinguish unknown services from services with nobody healthy

use thiserror::Error;

use crate::discovery::RegistrySnapshot;
use crate::load_balancer::{LoadBalancePolicy, SelectionPolicy};
use crate::registry::ServiceInstance;

/// Why no instance could be selected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// The snapshot has never held an entry for this service.
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// The service is known but no healthy instance is available.
    #[error("no healthy instance of '{0}'")]
    NoHealthyInstance(String),
}

/// Picks one instance per request.
#[derive(Debug)]
pub struct InstanceSelector {
    policy: Box<dyn SelectionPolicy>,
}

impl InstanceSelector {
    pub fn new(policy: LoadBalancePolicy) -> Self {
        Self::with_policy(policy.build())
    }

    pub fn with_policy(policy: Box<dyn SelectionPolicy>) -> Self {
        Self { policy }
    }

    /// Select a healthy instance of `service`.
    pub fn select(&self, snapshot: &RegistrySnapshot, service: &str) -> Result<ServiceInstance, SelectError> {
        let candidates = healthy_candidates(snapshot, service)?;

        let index = self.policy.pick(service, &candidates);
        // Policies return in-range indexes; fall back to the first candidate regardless.
        let chosen = candidates.get(index).unwrap_or(&candidates[0]);
        Ok((*chosen).clone())
    }

    /// Select a healthy instance of `service` other than `exclude`, for a retry.
    ///
    /// Takes the next healthy instance after `exclude` in snapshot order and
    /// leaves the policy untouched, so retries never shift the rotation seen
    /// by first attempts.
    pub fn select_excluding(
        &self,
        snapshot: &RegistrySnapshot,
        service: &str,
        exclude: &str,
    ) -> Result<ServiceInstance, SelectError> {
        let candidates = healthy_candidates(snapshot, service)?;
        let start = candidates
            .iter()
            .position(|instance| instance.id == exclude)
            .map(|i| i + 1)
            .unwrap_or(0);

        candidates
            .iter()
            .cycle()
            .skip(start)
            .take(candidates.len())
            .find(|instance| instance.id != exclude)
            .map(|instance| (*instance).clone())
            .ok_or_else(|| SelectError::NoHealthyInstance(service.to_string()))
    }
}

fn healthy_candidates<'a>(snapshot: &'a RegistrySnapshot, service: &str) -> Result<Vec<&'a ServiceInstance>, SelectError> {
    let entry = snapshot
        .get(service)
        .ok_or_else(|| SelectError::UnknownService(service.to_string()))?;

    let candidates: Vec<&ServiceInstance> = entry.instances().iter().filter(|instance| instance.healthy).collect();

    if candidates.is_empty() {
        tracing::debug!(
            service = %service,
            cached = entry.instances().len(),
            stale = entry.is_stale(),
            "No healthy instance to select"
        );
        return Err(SelectError::NoHealthyInstance(service.to_string()));
    }
    Ok(candidates)
}
