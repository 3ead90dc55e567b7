//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig / ServiceConfig (validated, immutable)
//!     → handed to the components that need each section
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; routes never change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    DiscoveryConfig, GatewayConfig, ListenerConfig, ObservabilityConfig, RegistrationConfig,
    RegistryBackend, RegistryConfig, RetryConfig, RouteConfig, ServiceConfig, ServiceSettings,
    StaticInstanceConfig, TimeoutConfig, TlsConfig,
};
pub use validation::{Validate, ValidationError};
