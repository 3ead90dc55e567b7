//! Round-robin load balancing strategy.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::SelectionPolicy;
use crate::registry::ServiceInstance;

/// Round-robin selector.
/// Keeps one rotating counter per service name.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self, service: &str) -> usize {
        if let Some(cursor) = self.cursors.get(service) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(service.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl SelectionPolicy for RoundRobin {
    fn pick(&self, service: &str, candidates: &[&ServiceInstance]) -> usize {
        self.next(service) % candidates.len().max(1)
    }
}
