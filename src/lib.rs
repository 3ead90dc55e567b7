//! Registry-backed dynamic reverse-proxy gateway.
//!
//! The gateway resolves routes against a live service registry; backend
//! services use the registration side to advertise and withdraw themselves.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Discovery and traffic management
pub mod discovery;
pub mod load_balancer;
pub mod registry;

// Service side
pub mod registration;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::{GatewayConfig, ServiceConfig};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use registration::{RegistrationManager, RegistrationState};
pub use registry::{RegistryClient, ServiceInstance};
