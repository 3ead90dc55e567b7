//! Configuration schema definitions.
//!
//! Two roots live here: [`GatewayConfig`] for the routing gateway and
//! [`ServiceConfig`] for a backend that registers itself. They share the
//! [`RegistryConfig`] and [`ObservabilityConfig`] sections.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::load_balancer::LoadBalancePolicy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Service registry the routing table is resolved against.
    pub registry: RegistryConfig,

    /// Instance cache and load balancing settings.
    pub discovery: DiscoveryConfig,

    /// Route definitions mapping requests to upstream services.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Root configuration for a self-registering backend service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identity and listener of this service.
    pub service: ServiceSettings,

    /// Registry to advertise this instance to.
    pub registry: RegistryConfig,

    /// Registration lifecycle timings.
    pub registration: RegistrationConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Which registry implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    /// Consul agent HTTP API.
    #[default]
    Consul,
    /// In-process registry seeded from `instances`.
    Static,
}

/// Service registry connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend implementation.
    pub backend: RegistryBackend,

    /// Base URL of the registry agent (e.g., "http://127.0.0.1:8500").
    pub address: String,

    /// Optional ACL token.
    pub token: Option<String>,

    /// Upper bound for a single registry call in milliseconds.
    pub timeout_ms: u64,

    /// Instances served by the `static` backend.
    pub instances: Vec<StaticInstanceConfig>,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Consul,
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            timeout_ms: 2000,
            instances: Vec::new(),
        }
    }
}

/// A fixed instance for the static registry backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticInstanceConfig {
    /// Unique instance id.
    pub id: String,

    /// Logical service name.
    pub service: String,

    /// Host or IP the instance listens on.
    pub address: String,

    /// Port the instance listens on.
    pub port: u16,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// Instance cache and selection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Interval between background refreshes of each tracked service.
    pub refresh_interval_ms: u64,

    /// Consecutive refresh failures tolerated before the cached list is dropped.
    pub failure_ceiling: u32,

    /// Load balancing policy.
    pub policy: LoadBalancePolicy,
}

impl DiscoveryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5000,
            failure_ceiling: 3,
            policy: LoadBalancePolicy::RoundRobin,
        }
    }
}

/// Route configuration mapping requests to an upstream service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host to match: exact ("example.com") or wildcard subdomain ("*.example.com").
    /// Absent matches any host.
    pub host: Option<String>,

    /// Path to match: prefix when ending in "/*" (e.g. "/api/*"), exact otherwise.
    pub path: String,

    /// Registry service name to forward to.
    pub upstream: String,

    /// Replacement for the matched prefix.
    #[serde(default)]
    pub rewrite: Option<String>,
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for one upstream attempt) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry a failed safe request once against a different instance.
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Identity of a self-registering service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Logical service name shared by all instances.
    pub name: String,

    /// Local bind address.
    pub bind_address: String,

    /// Address advertised to the registry. Derived when absent.
    pub advertise_address: Option<String>,

    /// Path of the health endpoint polled by the registry.
    pub health_path: String,

    pub tags: Vec<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "sample-api".to_string(),
            bind_address: "0.0.0.0:5000".to_string(),
            advertise_address: None,
            health_path: "/health".to_string(),
            tags: Vec::new(),
        }
    }
}

/// Registration lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Interval at which the registry polls the health endpoint.
    pub check_interval_secs: u64,

    /// Timeout the registry applies to each health poll.
    pub check_timeout_secs: u64,

    /// Time-to-live of the heartbeat check.
    pub ttl_secs: u64,

    /// Heartbeat interval in milliseconds; must be shorter than the TTL.
    pub renew_interval_ms: u64,

    /// Registry-side reaping of an instance that stays critical this long.
    pub deregister_critical_after_secs: u64,

    /// Upper bound for a single registry call in milliseconds.
    pub call_timeout_ms: u64,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Registration attempts before giving up (0 = keep trying until shutdown).
    pub max_attempts: u32,

    /// Total time allowed for deregistration during shutdown, in milliseconds.
    pub shutdown_deadline_ms: u64,

    /// Deregistration attempts within the shutdown deadline.
    pub deregister_attempts: u32,
}

impl RegistrationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            check_timeout_secs: 5,
            ttl_secs: 30,
            renew_interval_ms: 10_000,
            deregister_critical_after_secs: 60,
            call_timeout_ms: 3000,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            max_attempts: 0,
            shutdown_deadline_ms: 5000,
            deregister_attempts: 3,
        }
    }
}
