//! In-process registry backend.
//!
//! Serves a fixed instance list from configuration, and doubles as a
//! controllable registry in tests: outages can be simulated and calls are
//! recorded. Heartbeat TTLs are honored the same way an agent would: an
//! instance that is not renewed within its TTL stops being listed, and is
//! removed once it has been critical for `deregister_critical_after`.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use crate::config::StaticInstanceConfig;
use crate::registry::{
    HealthStatus, Registration, RegistryClient, RegistryError, RegistryResult, ServiceInstance,
};

#[derive(Debug, Clone)]
struct Entry {
    instance: ServiceInstance,
    status: HealthStatus,
    /// `None` for static instances, which never expire.
    ttl: Option<(Duration, Duration)>,
    renewed_at: Instant,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.ttl, Some((ttl, _)) if now.duration_since(self.renewed_at) > ttl)
    }

    fn reapable(&self, now: Instant) -> bool {
        matches!(self.ttl, Some((ttl, reap)) if now.duration_since(self.renewed_at) > ttl + reap)
    }
}

/// Registry kept in process memory.
#[derive(Debug)]
pub struct MemoryRegistry {
    entries: DashMap<String, Entry>,
    available: AtomicBool,
    list_calls: AtomicUsize,
    register_calls: AtomicUsize,
    deregistered: Mutex<Vec<String>>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            list_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            deregistered: Mutex::new(Vec::new()),
        }
    }

    /// Build a registry serving the configured static instances.
    pub fn from_config(instances: &[StaticInstanceConfig]) -> Self {
        let registry = Self::new();
        for cfg in instances {
            let mut instance = ServiceInstance::new(&cfg.id, &cfg.service, &cfg.address, cfg.port);
            instance.tags = cfg.tags.iter().cloned().collect();
            registry.insert(instance);
        }
        registry
    }

    /// Add or replace an instance that never expires.
    pub fn insert(&self, instance: ServiceInstance) {
        let status = if instance.healthy {
            HealthStatus::Passing
        } else {
            HealthStatus::Critical
        };
        self.entries.insert(
            instance.id.clone(),
            Entry {
                instance,
                status,
                ttl: None,
                renewed_at: Instant::now(),
            },
        );
    }

    /// Drop an instance without recording a deregistration.
    pub fn remove(&self, service_id: &str) {
        self.entries.remove(service_id);
    }

    /// Override the check status of an instance.
    pub fn set_status(&self, service_id: &str, status: HealthStatus) {
        if let Some(mut entry) = self.entries.get_mut(service_id) {
            entry.status = status;
        }
    }

    /// Simulate the registry becoming unreachable (`false`) or recovering.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.entries.contains_key(service_id)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Ids passed to successful `deregister` calls, in call order.
    pub fn deregistered_ids(&self) -> Vec<String> {
        match self.deregistered.lock() {
            Ok(ids) => ids.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn ensure_available(&self) -> RegistryResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::Unavailable("registry unreachable".to_string()))
        }
    }

    fn reap(&self, now: Instant) {
        self.entries.retain(|id, entry| {
            let keep = !entry.reapable(now);
            if !keep {
                tracing::info!(service_id = %id, "Reaping instance after TTL expiry");
            }
            keep
        });
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn list_healthy(&self, service_name: &str, _timeout: Duration) -> RegistryResult<Vec<ServiceInstance>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let now = Instant::now();
        self.reap(now);

        let seen = SystemTime::now();
        let mut instances: Vec<ServiceInstance> = self
            .entries
            .iter()
            .filter(|e| e.instance.service_name == service_name)
            .filter(|e| e.status == HealthStatus::Passing && !e.expired(now))
            .map(|e| ServiceInstance {
                healthy: true,
                last_seen: seen,
                ..e.instance.clone()
            })
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    async fn register(&self, registration: &Registration, _timeout: Duration) -> RegistryResult<()> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let mut instance = ServiceInstance::new(
            &registration.service_id,
            &registration.service_name,
            &registration.address,
            registration.port,
        );
        instance.tags = registration.tags.iter().cloned().collect();

        match self.entries.entry(registration.service_id.clone()) {
            Slot::Occupied(_) => Err(RegistryError::Conflict(registration.service_id.clone())),
            Slot::Vacant(slot) => {
                slot.insert(Entry {
                    instance,
                    status: HealthStatus::Passing,
                    ttl: Some((registration.ttl, registration.deregister_critical_after)),
                    renewed_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    async fn deregister(&self, service_id: &str, _timeout: Duration) -> RegistryResult<()> {
        self.ensure_available()?;
        self.entries.remove(service_id);
        match self.deregistered.lock() {
            Ok(mut ids) => ids.push(service_id.to_string()),
            Err(poisoned) => poisoned.into_inner().push(service_id.to_string()),
        }
        Ok(())
    }

    async fn report_health(&self, service_id: &str, status: HealthStatus, _timeout: Duration) -> RegistryResult<()> {
        self.ensure_available()?;
        match self.entries.get_mut(service_id) {
            Some(mut entry) => {
                entry.status = status;
                entry.renewed_at = Instant::now();
                Ok(())
            }
            None => Err(RegistryError::NotRegistered(service_id.to_string())),
        }
    }

    fn backend(&self) -> &'static str {
        "static"
    }
}
