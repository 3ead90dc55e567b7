//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Take the default level from configuration, let RUST_LOG override it
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Human-readable fmt output; sinks are the deployment's concern

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `default_directives` is used when `RUST_LOG` is unset, e.g.
/// `"discovery_gateway=info,tower_http=info"`.
pub fn init_logging(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    // A second initialisation (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Directives for this crate and its HTTP middleware at `level`.
pub fn default_directives(level: &str) -> String {
    format!("discovery_gateway={level},sample_service={level},tower_http={level}", level = level)
}
