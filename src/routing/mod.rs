//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate host and path conditions)
//!     → Return: matched Route + rewritten path, or NoRouteMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Parse host and path patterns
//!     → Freeze as immutable RouteTable (configuration order kept)
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - Longest path prefix wins; ties go to the more specific host, then the first route

pub mod matcher;
pub mod router;

pub use matcher::{normalize_host, HostPattern, PathPattern};
pub use router::{NoRouteMatch, Route, RouteMatch, RouteTable};
