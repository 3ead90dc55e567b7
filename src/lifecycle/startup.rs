//! Startup orchestration helpers.
//!
//! # Responsibilities
//! - Build the configured registry backend
//! - Work out the address a service advertises to the registry
//!
//! # Design Decisions
//! - Fail fast: an unusable registry configuration is fatal
//! - Backends are chosen here, once; nothing downstream knows which one runs

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use url::Url;

use crate::config::{RegistryBackend, RegistryConfig};
use crate::registry::{ConsulRegistry, MemoryRegistry, RegistryClient, RegistryResult};

/// Build the registry client selected by configuration.
pub fn build_registry(config: &RegistryConfig) -> RegistryResult<Arc<dyn RegistryClient>> {
    let registry: Arc<dyn RegistryClient> = match config.backend {
        RegistryBackend::Consul => Arc::new(ConsulRegistry::new(&config.address, config.token.clone())?),
        RegistryBackend::Static => Arc::new(MemoryRegistry::from_config(&config.instances)),
    };
    tracing::info!(
        backend = registry.backend(),
        address = %config.address,
        "Registry client ready"
    );
    Ok(registry)
}

/// The address a service should advertise.
///
/// In order: the configured address, the bind IP when it is not a wildcard,
/// then the local interface the OS would use to reach the registry.
pub fn resolve_advertise_address(
    configured: Option<&str>,
    bind: SocketAddr,
    registry_address: &str,
) -> io::Result<String> {
    if let Some(address) = configured {
        return Ok(address.to_string());
    }
    if !bind.ip().is_unspecified() {
        return Ok(bind.ip().to_string());
    }
    outbound_ip(registry_address).map(|ip| ip.to_string())
}

/// Local IP chosen for traffic to `target`. Connecting a UDP socket sends nothing.
fn outbound_ip(target: &str) -> io::Result<IpAddr> {
    let url = Url::parse(target).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let host = url
        .host_str()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "registry address has no host"))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let remote = (host.trim_start_matches('[').trim_end_matches(']'), port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "registry host did not resolve"))?;
    let local: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(local)?;
    socket.connect(remote)?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticInstanceConfig;

    #[test]
    fn test_configured_address_wins() {
        let bind: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        let addr = resolve_advertise_address(Some("svc.internal"), bind, "http://127.0.0.1:8500").unwrap();
        assert_eq!(addr, "svc.internal");
    }

    #[test]
    fn test_specific_bind_ip_is_used() {
        let bind: SocketAddr = "10.1.2.3:5000".parse().unwrap();
        let addr = resolve_advertise_address(None, bind, "http://127.0.0.1:8500").unwrap();
        assert_eq!(addr, "10.1.2.3");
    }

    #[test]
    fn test_wildcard_bind_uses_route_to_registry() {
        let bind: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        let addr = resolve_advertise_address(None, bind, "http://127.0.0.1:8500").unwrap();
        assert_eq!(addr, "127.0.0.1");
    }

    #[test]
    fn test_ipv6_registry_uses_ipv6_route() {
        // Hosts without IPv6 loopback have nothing to check.
        if UdpSocket::bind("[::1]:0").is_err() {
            return;
        }
        let bind: SocketAddr = "[::]:5000".parse().unwrap();
        let addr = resolve_advertise_address(None, bind, "http://[::1]:8500").unwrap();
        assert_eq!(addr, "::1");
    }

    #[tokio::test]
    async fn test_build_static_registry() {
        let config = RegistryConfig {
            backend: RegistryBackend::Static,
            instances: vec![StaticInstanceConfig {
                id: "orders-1".into(),
                service: "orders".into(),
                address: "127.0.0.1".into(),
                port: 7001,
                tags: vec![],
            }],
            ..RegistryConfig::default()
        };

        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.backend(), "static");
        let listed = registry
            .list_healthy("orders", std::time::Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }
}
