//! Background-refreshed instance cache.
//!
//! # Responsibilities
//! - Hold the current RegistrySnapshot behind one atomically swapped Arc
//! - Refresh each tracked service on a fixed interval
//! - Refresh on demand when a read finds no entry, one fetch per service at a time
//! - Fail open on registry errors, up to the failure ceiling

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::DiscoveryConfig;
use crate::discovery::snapshot::{RegistrySnapshot, ServiceSnapshot};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::{RegistryClient, RegistryResult};

/// Locally cached view of the registry.
#[derive(Debug)]
pub struct InstanceCache {
    registry: Arc<dyn RegistryClient>,
    snapshot: ArcSwap<RegistrySnapshot>,
    refresh_interval: Duration,
    call_timeout: Duration,
    failure_ceiling: u32,
    /// Per-service gate for on-demand fetches, holding the last failed attempt.
    on_demand: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl InstanceCache {
    pub fn new(registry: Arc<dyn RegistryClient>, config: &DiscoveryConfig, call_timeout: Duration) -> Self {
        Self {
            registry,
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::new()),
            refresh_interval: config.refresh_interval(),
            call_timeout,
            failure_ceiling: config.failure_ceiling,
            on_demand: DashMap::new(),
        }
    }

    /// The current snapshot. Never blocks.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// The current snapshot, fetching `service` first if it has never been seen.
    ///
    /// Concurrent readers of an unseen service share one registry call. After
    /// a failed fetch, readers get the snapshot as is until a refresh interval
    /// has passed; the background task keeps retrying meanwhile.
    pub async fn current_for(&self, service: &str) -> Arc<RegistrySnapshot> {
        let current = self.snapshot.load_full();
        if current.contains(service) {
            return current;
        }

        let gate = Arc::clone(self.on_demand.entry(service.to_string()).or_default().value());
        let mut last_failure = gate.lock().await;

        let current = self.snapshot.load_full();
        if current.contains(service) {
            return current;
        }
        if matches!(*last_failure, Some(at) if at.elapsed() < self.refresh_interval) {
            return current;
        }

        tracing::debug!(service = %service, "No cached entry, refreshing on demand");
        match self.refresh(service).await {
            Ok(_) => *last_failure = None,
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "On-demand refresh failed");
                *last_failure = Some(Instant::now());
            }
        }
        self.snapshot.load_full()
    }

    /// Run one refresh cycle for `service`.
    ///
    /// Returns the number of instances now cached, or the registry error when
    /// the fetch failed. A failure never removes a previous entry before the
    /// failure ceiling is exceeded.
    pub async fn refresh(&self, service: &str) -> RegistryResult<usize> {
        match self.registry.list_healthy(service, self.call_timeout).await {
            Ok(instances) => {
                let count = instances.len();
                let entry = ServiceSnapshot::fresh(instances, SystemTime::now());
                self.snapshot.rcu(|current| current.with_service(service, entry.clone()));

                metrics::record_registry_refresh(service, "success");
                metrics::record_upstream_instances(service, count, false);
                tracing::trace!(service = %service, instances = count, "Refreshed instances");
                Ok(count)
            }
            Err(e) => {
                metrics::record_registry_refresh(service, "failure");

                if !self.snapshot.load().contains(service) {
                    return Err(e);
                }

                let ceiling = self.failure_ceiling;
                self.snapshot.rcu(|current| match current.get(service) {
                    Some(previous) => current.with_service(service, previous.degraded(ceiling)),
                    None => RegistrySnapshot::clone(current),
                });

                if let Some(entry) = self.snapshot.load().get(service) {
                    let failures = entry.consecutive_failures();
                    metrics::record_upstream_instances(service, entry.instances().len(), true);
                    if failures == ceiling.saturating_add(1) {
                        tracing::error!(
                            service = %service,
                            failures,
                            error = %e,
                            "Registry unreachable past failure ceiling, dropping cached instances"
                        );
                    } else if failures <= ceiling {
                        tracing::warn!(
                            service = %service,
                            failures,
                            instances = entry.instances().len(),
                            error = %e,
                            "Registry refresh failed, serving stale instances"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Refresh `service` every interval until shutdown.
    pub async fn run_refresh(self: Arc<Self>, service: String, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            service = %service,
            interval_ms = self.refresh_interval.as_millis() as u64,
            backend = self.registry.backend(),
            "Instance refresh starting"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are logged inside refresh().
                    let _ = self.refresh(&service).await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!(service = %service, "Instance refresh stopping");
                    break;
                }
            }
        }
    }

    /// Spawn one refresh task per service, all stopped by `shutdown`.
    pub fn spawn_refresh<I>(self: &Arc<Self>, services: I, shutdown: &Shutdown) -> Vec<JoinHandle<()>>
    where
        I: IntoIterator<Item = String>,
    {
        services
            .into_iter()
            .map(|service| tokio::spawn(Arc::clone(self).run_refresh(service, shutdown.subscribe())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{InstanceSelector, LoadBalancePolicy, SelectError};
    use crate::registry::{MemoryRegistry, ServiceInstance};

    fn config(ceiling: u32) -> DiscoveryConfig {
        DiscoveryConfig {
            refresh_interval_ms: 20,
            failure_ceiling: ceiling,
            policy: LoadBalancePolicy::RoundRobin,
        }
    }

    fn seeded() -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(ServiceInstance::new("orders-1", "orders", "127.0.0.1", 7001));
        registry.insert(ServiceInstance::new("orders-2", "orders", "127.0.0.1", 7002));
        registry
    }

    #[tokio::test]
    async fn test_on_demand_refresh() {
        let registry = seeded();
        let cache = InstanceCache::new(registry.clone(), &config(3), Duration::from_secs(1));

        assert!(cache.snapshot().is_empty());
        let snapshot = cache.current_for("orders").await;
        assert_eq!(snapshot.get("orders").unwrap().instances().len(), 2);
        assert_eq!(registry.list_calls(), 1);

        // Cached now; no second registry call.
        cache.current_for("orders").await;
        assert_eq!(registry.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_fail_open_until_ceiling() {
        let registry = seeded();
        let cache = InstanceCache::new(registry.clone(), &config(2), Duration::from_secs(1));
        let selector = InstanceSelector::new(LoadBalancePolicy::RoundRobin);

        cache.refresh("orders").await.unwrap();
        let held = cache.snapshot();
        registry.set_available(false);

        for _ in 0..2 {
            assert!(cache.refresh("orders").await.is_err());
            let snapshot = cache.snapshot();
            let entry = snapshot.get("orders").unwrap();
            assert!(entry.is_stale());
            assert_eq!(entry.instances().len(), 2);
            assert!(selector.select(&snapshot, "orders").is_ok());
        }

        assert!(cache.refresh("orders").await.is_err());
        let snapshot = cache.snapshot();
        assert!(snapshot.get("orders").unwrap().instances().is_empty());
        assert_eq!(
            selector.select(&snapshot, "orders").unwrap_err(),
            SelectError::NoHealthyInstance("orders".into())
        );

        // Readers holding an older snapshot are unaffected by swaps.
        assert_eq!(held.get("orders").unwrap().instances().len(), 2);
        assert!(!held.get("orders").unwrap().is_stale());

        registry.set_available(true);
        assert_eq!(cache.refresh("orders").await.unwrap(), 2);
        let entry_snapshot = cache.snapshot();
        let entry = entry_snapshot.get("orders").unwrap();
        assert!(!entry.is_stale());
        assert_eq!(entry.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_registry_leaves_unknown_service_absent() {
        let registry = seeded();
        registry.set_available(false);
        let cache = InstanceCache::new(registry, &config(3), Duration::from_secs(1));

        let snapshot = cache.current_for("orders").await;
        assert!(!snapshot.contains("orders"));
    }

    #[tokio::test]
    async fn test_on_demand_fetches_are_coalesced_during_outage() {
        let registry = seeded();
        registry.set_available(false);
        let slow_refresh = DiscoveryConfig {
            refresh_interval_ms: 60_000,
            ..config(3)
        };
        let cache = Arc::new(InstanceCache::new(registry.clone(), &slow_refresh, Duration::from_secs(1)));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.current_for("orders").await })
            })
            .collect();
        for handle in handles {
            assert!(!handle.await.unwrap().contains("orders"));
        }
        assert_eq!(registry.list_calls(), 1);

        // Later readers do not hammer the registry either.
        cache.current_for("orders").await;
        assert_eq!(registry.list_calls(), 1);

        // The next scheduled refresh still goes through.
        registry.set_available(true);
        assert_eq!(cache.refresh("orders").await.unwrap(), 2);
        assert!(cache.current_for("orders").await.contains("orders"));
    }

    #[tokio::test]
    async fn test_background_refresh_picks_up_changes() {
        let registry = seeded();
        let cache = Arc::new(InstanceCache::new(registry.clone(), &config(3), Duration::from_secs(1)));
        let shutdown = Shutdown::new();
        let handles = cache.spawn_refresh(vec!["orders".to_string()], &shutdown);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.snapshot().get("orders").unwrap().instances().len(), 2);

        registry.remove("orders-2");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.snapshot().get("orders").unwrap().instances().len(), 1);

        shutdown.trigger();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
