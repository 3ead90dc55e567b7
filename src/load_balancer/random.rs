//! Uniform random load balancing strategy.

use crate::load_balancer::SelectionPolicy;
use crate::registry::ServiceInstance;

/// Picks any healthy candidate with equal probability.
#[derive(Debug, Default)]
pub struct RandomPick;

impl RandomPick {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for RandomPick {
    fn pick(&self, _service: &str, candidates: &[&ServiceInstance]) -> usize {
        fastrand::usize(..candidates.len().max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_stays_in_bounds() {
        let lb = RandomPick::new();
        let owned: Vec<ServiceInstance> = (0..3)
            .map(|i| ServiceInstance::new(format!("i-{}", i), "svc", "127.0.0.1", 8080 + i))
            .collect();
        let candidates: Vec<&ServiceInstance> = owned.iter().collect();

        let mut seen = [false; 3];
        for _ in 0..300 {
            let idx = lb.pick("svc", &candidates);
            assert!(idx < 3);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
