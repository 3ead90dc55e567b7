//! Least-recently-used load balancing strategy.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::load_balancer::SelectionPolicy;
use crate::registry::ServiceInstance;

/// Least recently used selector.
/// Selects the instance whose last selection is oldest; never-used instances first.
#[derive(Debug, Default)]
pub struct LeastRecentlyUsed {
    /// Service name -> instance id -> logical time of its last selection.
    /// Only ids among the latest candidates are kept.
    last_used: DashMap<String, HashMap<String, u64>>,
    clock: AtomicU64,
}

impl LeastRecentlyUsed {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn tracked(&self, service: &str) -> usize {
        self.last_used.get(service).map(|ids| ids.len()).unwrap_or(0)
    }
}

impl SelectionPolicy for LeastRecentlyUsed {
    fn pick(&self, service: &str, candidates: &[&ServiceInstance]) -> usize {
        let mut last_used = self.last_used.entry(service.to_string()).or_default();
        last_used.retain(|id, _| candidates.iter().any(|c| &c.id == id));

        // In case of tie, the first one is selected (stability)
        let chosen = candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, instance)| last_used.get(&instance.id).copied().unwrap_or(0))
            .map(|(i, _)| i)
            .unwrap_or(0);

        if let Some(instance) = candidates.get(chosen) {
            let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
            last_used.insert(instance.id.clone(), tick);
        }
        chosen
    }
}
