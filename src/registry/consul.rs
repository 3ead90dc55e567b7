//! Consul agent backend.
//!
//! # Responsibilities
//! - Query passing instances through the health endpoint
//! - Register instances with an HTTP check and a TTL heartbeat check
//! - Deregister by id, treating an unknown id as success
//! - Renew the heartbeat check

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};
use url::Url;

use crate::registry::{
    bounded, HealthStatus, Registration, RegistryClient, RegistryError, RegistryResult,
    ServiceInstance,
};

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Registry client for the Consul agent HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    base: Url,
    http: Client,
    token: Option<String>,
}

impl ConsulRegistry {
    /// Create a client for the agent at `address` (e.g. "http://127.0.0.1:8500").
    pub fn new(address: &str, token: Option<String>) -> RegistryResult<Self> {
        let base = Url::parse(address).map_err(|e| {
            RegistryError::Unavailable(format!("invalid registry address '{}': {}", address, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(RegistryError::Unavailable(format!(
                "registry address '{}' cannot be used as a base URL",
                address
            )));
        }

        let http = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        Ok(Self { base, http, token })
    }

    /// The id of the heartbeat check attached to a registered instance.
    pub fn ttl_check_id(service_id: &str) -> String {
        format!("service:{}:ttl", service_id)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url, limit: Duration) -> RequestBuilder {
        let builder = self.http.request(method, url).timeout(limit);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> RegistryResult<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }

    async fn is_registered(&self, service_id: &str, limit: Duration) -> RegistryResult<bool> {
        let url = self.endpoint(&["v1", "agent", "service", service_id]);
        let response = Self::send(self.request(Method::GET, url, limit)).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected_status("agent service lookup", status)),
        }
    }
}

#[async_trait]
impl RegistryClient for ConsulRegistry {
    async fn list_healthy(&self, service_name: &str, timeout: Duration) -> RegistryResult<Vec<ServiceInstance>> {
        bounded("list_healthy", timeout, async {
            let mut url = self.endpoint(&["v1", "health", "service", service_name]);
            url.query_pairs_mut().append_pair("passing", "true");

            let response = Self::send(self.request(Method::GET, url, timeout)).await?;
            if !response.status().is_success() {
                return Err(unexpected_status("health query", response.status()));
            }
            let entries: Vec<HealthEntry> = response
                .json()
                .await
                .map_err(|e| RegistryError::Unavailable(format!("malformed health response: {}", e)))?;

            Ok(into_instances(entries, SystemTime::now()))
        })
        .await
    }

    async fn register(&self, registration: &Registration, timeout: Duration) -> RegistryResult<()> {
        bounded("register", timeout, async {
            // The agent endpoint is an upsert; probe first so a duplicate id is refused.
            if self.is_registered(&registration.service_id, timeout).await? {
                return Err(RegistryError::Conflict(registration.service_id.clone()));
            }

            let url = self.endpoint(&["v1", "agent", "service", "register"]);
            let body = AgentServiceRegistration::from(registration);
            let response = Self::send(self.request(Method::PUT, url, timeout).json(&body)).await?;
            if !response.status().is_success() {
                return Err(unexpected_status("register", response.status()));
            }
            Ok(())
        })
        .await
    }

    async fn deregister(&self, service_id: &str, timeout: Duration) -> RegistryResult<()> {
        bounded("deregister", timeout, async {
            let url = self.endpoint(&["v1", "agent", "service", "deregister", service_id]);
            let response = Self::send(self.request(Method::PUT, url, timeout)).await?;
            match response.status() {
                status if status.is_success() => Ok(()),
                StatusCode::NOT_FOUND => {
                    tracing::debug!(service_id = %service_id, "Deregistered unknown id");
                    Ok(())
                }
                status => Err(unexpected_status("deregister", status)),
            }
        })
        .await
    }

    async fn report_health(&self, service_id: &str, status: HealthStatus, timeout: Duration) -> RegistryResult<()> {
        bounded("report_health", timeout, async {
            let verb = match status {
                HealthStatus::Passing => "pass",
                HealthStatus::Warning => "warn",
                HealthStatus::Critical => "fail",
            };
            let check_id = Self::ttl_check_id(service_id);
            let url = self.endpoint(&["v1", "agent", "check", verb, &check_id]);
            let response = Self::send(self.request(Method::PUT, url, timeout)).await?;
            match response.status() {
                s if s.is_success() => Ok(()),
                StatusCode::NOT_FOUND => Err(RegistryError::NotRegistered(service_id.to_string())),
                s => Err(unexpected_status("check update", s)),
            }
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "consul"
    }
}

fn unexpected_status(operation: &str, status: StatusCode) -> RegistryError {
    RegistryError::Unavailable(format!("{} returned {}", operation, status))
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

fn into_instances(entries: Vec<HealthEntry>, seen: SystemTime) -> Vec<ServiceInstance> {
    entries
        .into_iter()
        .map(|entry| {
            let healthy = entry.checks.iter().all(|c| c.status == "passing");
            // An empty service address means "same as the node".
            let address = if entry.service.address.is_empty() {
                entry.node.address
            } else {
                entry.service.address
            };
            ServiceInstance {
                id: entry.service.id,
                service_name: entry.service.service,
                address,
                port: entry.service.port,
                tags: entry.service.tags.unwrap_or_default().into_iter().collect::<BTreeSet<_>>(),
                healthy,
                last_seen: seen,
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: NodeInfo,
    service: AgentService,
    #[serde(default)]
    checks: Vec<CheckInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeInfo {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CheckInfo {
    status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    address: String,
    port: u16,
    tags: Vec<String>,
    checks: Vec<AgentCheckRegistration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheckRegistration {
    #[serde(rename = "CheckID")]
    check_id: String,
    name: String,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    deregister_critical_service_after: String,
}

impl From<&Registration> for AgentServiceRegistration {
    fn from(reg: &Registration) -> Self {
        let reap_after = format_duration(reg.deregister_critical_after);
        let mut checks = Vec::with_capacity(2);

        if let Some(url) = &reg.health_check_url {
            checks.push(AgentCheckRegistration {
                check_id: format!("service:{}:http", reg.service_id),
                name: "HTTP health endpoint".to_string(),
                http: Some(url.clone()),
                interval: Some(format_duration(reg.check_interval)),
                timeout: Some(format_duration(reg.check_timeout)),
                ttl: None,
                status: None,
                deregister_critical_service_after: reap_after.clone(),
            });
        }

        checks.push(AgentCheckRegistration {
            check_id: ConsulRegistry::ttl_check_id(&reg.service_id),
            name: "Heartbeat".to_string(),
            http: None,
            interval: None,
            timeout: None,
            ttl: Some(format_duration(reg.ttl)),
            // Listed immediately instead of waiting for the first renewal.
            status: Some("passing".to_string()),
            deregister_critical_service_after: reap_after,
        });

        Self {
            id: reg.service_id.clone(),
            name: reg.service_name.clone(),
            address: reg.address.clone(),
            port: reg.port,
            tags: reg.tags.clone(),
            checks,
        }
    }
}
