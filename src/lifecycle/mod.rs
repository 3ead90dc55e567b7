//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build registry backend → Initialize components → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Stop refresh/renewal loops → Deregister → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger cooperative shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accepting, release registrations, exit
//! - Shutdown has a deadline: forced exit after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
