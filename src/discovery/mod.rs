//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Background refresh (one task per tracked service):
//!     interval tick
//!     → RegistryClient::list_healthy
//!     → success: fresh ServiceSnapshot
//!     → failure: previous list kept, marked stale (cleared past the ceiling)
//!     → RegistrySnapshot rebuilt and swapped in atomically
//!
//! Request path:
//!     InstanceCache::current_for(service)
//!     → lock-free load of the current RegistrySnapshot
//!     → on-demand refresh only when the service has never been fetched
//! ```
//!
//! # Design Decisions
//! - Fail open: a short registry outage keeps serving last known-good lists
//! - Bounded staleness: persistent outages end in "no upstream available"
//! - Snapshots are never edited in place; readers hold immutable Arcs

pub mod cache;
pub mod snapshot;

pub use cache::InstanceCache;
pub use snapshot::{RegistrySnapshot, ServiceSnapshot};
