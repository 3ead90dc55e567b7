//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check route patterns are well formed and uniquely named
//! - Check renewal happens well inside the registration TTL
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{
    GatewayConfig, RegistryBackend, RegistryConfig, RouteConfig, ServiceConfig,
};

/// A single semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Semantic validation implemented by each configuration root.
pub trait Validate {
    fn validate(&self) -> Result<(), Vec<ValidationError>>;
}

impl Validate for GatewayConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        check_socket_addr(&mut errors, "listener.bind_address", &self.listener.bind_address);
        validate_registry(&mut errors, &self.registry);

        if self.discovery.refresh_interval_ms == 0 {
            errors.push(ValidationError::new("discovery.refresh_interval_ms", "must be greater than 0"));
        }
        if self.timeouts.request_secs == 0 {
            errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
        }
        if self.timeouts.connect_secs == 0 {
            errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
        }

        let mut names = HashSet::new();
        for (i, route) in self.routes.iter().enumerate() {
            if !names.insert(route.name.as_str()) {
                errors.push(ValidationError::new(
                    format!("routes[{}].name", i),
                    format!("duplicate route name '{}'", route.name),
                ));
            }
            validate_route(&mut errors, i, route);
        }

        if self.observability.metrics_enabled {
            check_socket_addr(&mut errors, "observability.metrics_address", &self.observability.metrics_address);
        }

        finish(errors)
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.service.name.trim().is_empty() {
            errors.push(ValidationError::new("service.name", "must not be empty"));
        }
        match self.service.bind_address.parse::<SocketAddr>() {
            Ok(addr) if addr.port() == 0 => {
                errors.push(ValidationError::new("service.bind_address", "port must be fixed to be advertised"));
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::new("service.bind_address", e.to_string())),
        }
        if !self.service.health_path.starts_with('/') {
            errors.push(ValidationError::new("service.health_path", "must start with '/'"));
        }

        validate_registry(&mut errors, &self.registry);

        let reg = &self.registration;
        if reg.ttl_secs == 0 {
            errors.push(ValidationError::new("registration.ttl_secs", "must be greater than 0"));
        } else if reg.renew_interval_ms == 0 || reg.renew_interval_ms >= reg.ttl_secs * 1000 {
            errors.push(ValidationError::new(
                "registration.renew_interval_ms",
                "must be greater than 0 and shorter than the TTL",
            ));
        }
        if reg.check_interval_secs == 0 {
            errors.push(ValidationError::new("registration.check_interval_secs", "must be greater than 0"));
        }
        if reg.call_timeout_ms == 0 {
            errors.push(ValidationError::new("registration.call_timeout_ms", "must be greater than 0"));
        }
        if reg.base_delay_ms > reg.max_delay_ms {
            errors.push(ValidationError::new("registration.base_delay_ms", "must not exceed max_delay_ms"));
        }
        if reg.deregister_attempts == 0 {
            errors.push(ValidationError::new("registration.deregister_attempts", "must be at least 1"));
        }

        finish(errors)
    }
}

fn validate_registry(errors: &mut Vec<ValidationError>, registry: &RegistryConfig) {
    if registry.timeout_ms == 0 {
        errors.push(ValidationError::new("registry.timeout_ms", "must be greater than 0"));
    }
    match registry.backend {
        RegistryBackend::Consul => {
            if let Err(e) = Url::parse(&registry.address) {
                errors.push(ValidationError::new("registry.address", e.to_string()));
            }
        }
        RegistryBackend::Static => {
            let mut ids = HashSet::new();
            for (i, instance) in registry.instances.iter().enumerate() {
                if !ids.insert(instance.id.as_str()) {
                    errors.push(ValidationError::new(
                        format!("registry.instances[{}].id", i),
                        format!("duplicate instance id '{}'", instance.id),
                    ));
                }
            }
        }
    }
}

fn validate_route(errors: &mut Vec<ValidationError>, index: usize, route: &RouteConfig) {
    if route.upstream.trim().is_empty() {
        errors.push(ValidationError::new(format!("routes[{}].upstream", index), "must not be empty"));
    }
    if !route.path.starts_with('/') {
        errors.push(ValidationError::new(format!("routes[{}].path", index), "must start with '/'"));
    }
    if let Some(rewrite) = &route.rewrite {
        if !rewrite.starts_with('/') {
            errors.push(ValidationError::new(format!("routes[{}].rewrite", index), "must start with '/'"));
        }
    }
    if let Some(host) = &route.host {
        let bare = host.strip_prefix("*.").unwrap_or(host);
        if bare.is_empty() || bare.contains('*') || bare.contains('/') {
            errors.push(ValidationError::new(
                format!("routes[{}].host", index),
                "expected 'example.com' or '*.example.com'",
            ));
        }
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if let Err(e) = value.parse::<SocketAddr>() {
        errors.push(ValidationError::new(field, e.to_string()));
    }
}

fn finish(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
