//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → upstream service name identified
//!     → RegistrySnapshot (from the instance cache)
//!     → selector.rs (filter to healthy instances, exclude a failed one on retry)
//!     → Apply load balancing policy:
//!         - round_robin.rs (per-service rotating cursor)
//!         - random.rs (uniform pick)
//!         - least_used.rs (least recently picked instance)
//!     → Return one ServiceInstance or a typed error
//! ```
//!
//! # Design Decisions
//! - Policy chosen once at composition time, behind a trait object
//! - Unhealthy instances never reach a policy
//! - "No healthy instance" is distinct from "never heard of this service"
//! - Shared state on the hot path is atomics or sharded maps, never one global lock

pub mod least_used;
pub mod random;
pub mod round_robin;
pub mod selector;

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::registry::ServiceInstance;

pub use least_used::LeastRecentlyUsed;
pub use random::RandomPick;
pub use round_robin::RoundRobin;
pub use selector::{InstanceSelector, SelectError};

/// A strategy for choosing among healthy candidates.
pub trait SelectionPolicy: Send + Sync + Debug {
    /// Index into `candidates` of the instance to use.
    ///
    /// `candidates` is never empty and contains healthy instances only.
    fn pick(&self, service: &str, candidates: &[&ServiceInstance]) -> usize;
}

/// Policy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancePolicy {
    #[default]
    RoundRobin,
    Random,
    LeastRecentlyUsed,
}

impl LoadBalancePolicy {
    pub fn build(self) -> Box<dyn SelectionPolicy> {
        match self {
            LoadBalancePolicy::RoundRobin => Box::new(RoundRobin::new()),
            LoadBalancePolicy::Random => Box::new(RandomPick::new()),
            LoadBalancePolicy::LeastRecentlyUsed => Box::new(LeastRecentlyUsed::new()),
        }
    }
}
