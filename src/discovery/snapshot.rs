//! Immutable point-in-time views of registry data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::registry::ServiceInstance;

/// Cached instance list of one service.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    instances: Arc<[ServiceInstance]>,
    fetched_at: SystemTime,
    stale: bool,
    consecutive_failures: u32,
}

impl ServiceSnapshot {
    /// A freshly fetched list.
    pub fn fresh(instances: Vec<ServiceInstance>, fetched_at: SystemTime) -> Self {
        Self {
            instances: instances.into(),
            fetched_at,
            stale: false,
            consecutive_failures: 0,
        }
    }

    /// The successor of `self` after a failed refresh.
    ///
    /// The previous list is kept while failures stay within `ceiling`, and
    /// dropped once they exceed it. `fetched_at` keeps pointing at the last
    /// successful fetch.
    pub fn degraded(&self, ceiling: u32) -> Self {
        let consecutive_failures = self.consecutive_failures.saturating_add(1);
        let instances = if consecutive_failures > ceiling {
            Arc::from(Vec::new())
        } else {
            Arc::clone(&self.instances)
        };
        Self {
            instances,
            fetched_at: self.fetched_at,
            stale: true,
            consecutive_failures,
        }
    }

    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Service name → cached instance list, published as one unit.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    services: HashMap<String, Arc<ServiceSnapshot>>,
}

impl RegistrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service: &str) -> Option<&ServiceSnapshot> {
        self.services.get(service).map(|s| s.as_ref())
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// A copy of `self` with `service` replaced. Other entries are shared.
    pub fn with_service(&self, service: &str, entry: ServiceSnapshot) -> Self {
        let mut services = self.services.clone();
        services.insert(service.to_string(), Arc::new(entry));
        Self { services }
    }
}
