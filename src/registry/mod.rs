//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway side:
//!     InstanceCache refresh → RegistryClient::list_healthy → Vec<ServiceInstance>
//!
//! Service side:
//!     RegistrationManager → register → report_health (loop) → deregister
//! ```
//!
//! # Design Decisions
//! - One capability trait, backends chosen at composition time
//! - Every call carries a caller-supplied timeout
//! - No retries here; the cache and the registration manager own their policies
//! - Deregistering an unknown id is a success

pub mod consul;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

pub use consul::ConsulRegistry;
pub use memory::MemoryRegistry;

/// One running process of a named service, as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Unique per running process, not per service name.
    pub id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub tags: BTreeSet<String>,
    pub healthy: bool,
    pub last_seen: SystemTime,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, service_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            service_name: service_name.into(),
            address: address.into(),
            port,
            tags: BTreeSet::new(),
            healthy: true,
            last_seen: SystemTime::now(),
        }
    }

    /// `host:port` suitable for an HTTP authority.
    pub fn authority(&self) -> String {
        authority(&self.address, self.port)
    }
}

/// `host:port` with IPv6 literals bracketed.
pub fn authority(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, port)
    } else {
        format!("{}:{}", address, port)
    }
}

/// What a service advertises about itself when it registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub service_id: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    /// URL the registry polls; `None` registers a heartbeat-only instance.
    pub health_check_url: Option<String>,
    pub check_interval: Duration,
    pub check_timeout: Duration,
    /// Heartbeat TTL; the instance turns critical when not renewed in time.
    pub ttl: Duration,
    /// Registry-side removal of an instance that stays critical this long.
    pub deregister_critical_after: Duration,
}

impl Registration {
    /// Build a registration with a freshly generated instance id.
    pub fn new(service_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let service_name = service_name.into();
        Self {
            service_id: generate_service_id(&service_name),
            service_name,
            address: address.into(),
            port,
            tags: Vec::new(),
            health_check_url: None,
            check_interval: Duration::from_secs(10),
            check_timeout: Duration::from_secs(5),
            ttl: Duration::from_secs(30),
            deregister_critical_after: Duration::from_secs(60),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_health_check(mut self, url: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        self.health_check_url = Some(url.into());
        self.check_interval = interval;
        self.check_timeout = timeout;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration, deregister_critical_after: Duration) -> Self {
        self.ttl = ttl;
        self.deregister_critical_after = deregister_critical_after;
        self
    }
}

/// `<service name>-<uuid v4>`: restarts never collide with a still-listed predecessor.
pub fn generate_service_id(service_name: &str) -> String {
    format!("{}-{}", service_name, Uuid::new_v4())
}

/// Health result reported on the heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Errors that can occur while talking to the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Network, protocol or timeout failure.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// An instance with this id is already registered.
    #[error("instance id '{0}' is already registered")]
    Conflict(String),

    /// Heartbeat for an id the registry no longer knows.
    #[error("instance id '{0}' is not registered")]
    NotRegistered(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Capability over an external service registry.
#[async_trait]
pub trait RegistryClient: Send + Sync + std::fmt::Debug {
    /// Instances of `service_name` whose checks are all passing.
    async fn list_healthy(&self, service_name: &str, timeout: Duration) -> RegistryResult<Vec<ServiceInstance>>;

    /// Register a new instance. Fails with `Conflict` if the id is taken.
    async fn register(&self, registration: &Registration, timeout: Duration) -> RegistryResult<()>;

    /// Remove an instance by id. Succeeds when the id is unknown.
    async fn deregister(&self, service_id: &str, timeout: Duration) -> RegistryResult<()>;

    /// Renew the heartbeat check of an instance with the given status.
    async fn report_health(&self, service_id: &str, status: HealthStatus, timeout: Duration) -> RegistryResult<()>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Bound a registry call by `limit`, mapping expiry to `Unavailable`.
pub(crate) async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> RegistryResult<T>
where
    F: std::future::Future<Output = RegistryResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::Unavailable(format!(
            "{} timed out after {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}
