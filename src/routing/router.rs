//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in configuration order
//! - Look up the best matching route for a host/path
//! - Apply the route's path rewrite
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan; typical route counts are small
//! - Longest path match wins, then host specificity, then configuration order

use std::collections::BTreeSet;
use thiserror::Error;

use crate::config::RouteConfig;
use crate::routing::matcher::{HostPattern, PathPattern};

/// No route matched the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no route matches {host}{path}")]
pub struct NoRouteMatch {
    pub host: String,
    pub path: String,
}

/// A compiled route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub host: HostPattern,
    pub path: PathPattern,
    pub upstream: String,
    pub rewrite: Option<String>,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Self {
        Self {
            name: config.name.clone(),
            host: HostPattern::parse(config.host.as_deref()),
            path: PathPattern::parse(&config.path),
            upstream: config.upstream.clone(),
            rewrite: config.rewrite.clone(),
        }
    }

    /// The path to send upstream for an inbound `path` this route matched.
    pub fn forward_path(&self, path: &str) -> String {
        let Some(replacement) = &self.rewrite else {
            return path.to_string();
        };
        let rest = self.path.remainder(path);
        let base = replacement.trim_end_matches('/');
        let rewritten = if rest.is_empty() {
            replacement.clone()
        } else {
            format!("{}{}", base, rest)
        };
        if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{}", rewritten)
        }
    }
}

/// The outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    /// Path to forward, after any rewrite. Query strings are not included.
    pub forward_path: String,
}

/// Host/path → upstream service lookup table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile routes, preserving configuration order.
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let routes: Vec<Route> = configs.iter().map(Route::from_config).collect();
        for route in &routes {
            tracing::debug!(
                route = %route.name,
                host = ?route.host,
                path = ?route.path,
                upstream = %route.upstream,
                "Route compiled"
            );
        }
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Distinct upstream service names referenced by any route.
    pub fn upstream_services(&self) -> BTreeSet<String> {
        self.routes.iter().map(|r| r.upstream.clone()).collect()
    }

    /// Find the best route for `host` and `path`.
    pub fn resolve(&self, host: &str, path: &str) -> Result<RouteMatch<'_>, NoRouteMatch> {
        let mut best: Option<(&Route, (usize, bool, (u8, usize)))> = None;

        for route in &self.routes {
            if !route.host.matches(host) {
                continue;
            }
            let Some(len) = route.path.match_len(path) else {
                continue;
            };
            let rank = (len, route.path.is_exact(), route.host.specificity());
            // Strictly greater: on a full tie the earlier route stays.
            if best.as_ref().map_or(true, |(_, current)| rank > *current) {
                best = Some((route, rank));
            }
        }

        match best {
            Some((route, _)) => Ok(RouteMatch {
                route,
                forward_path: route.forward_path(path),
            }),
            None => Err(NoRouteMatch {
                host: host.to_string(),
                path: path.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, host: Option<&str>, path: &str, upstream: &str) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            host: host.map(str::to_string),
            path: path.into(),
            upstream: upstream.into(),
            rewrite: None,
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::from_config(&[
            route("a", None, "/api/*", "A"),
            route("b", None, "/api/v2/*", "B"),
        ]);

        assert_eq!(table.resolve("any", "/api/v2/orders").unwrap().route.upstream, "B");
        assert_eq!(table.resolve("any", "/api/v1/orders").unwrap().route.upstream, "A");
        assert_eq!(table.resolve("any", "/api").unwrap().route.upstream, "A");
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::from_config(&[route("a", Some("example.com"), "/api/*", "A")]);

        let err = table.resolve("other.com", "/api/x").unwrap_err();
        assert_eq!(err.host, "other.com");
        assert!(table.resolve("example.com", "/web").is_err());
    }

    #[test]
    fn test_exact_host_beats_wildcard() {
        let table = RouteTable::from_config(&[
            route("any", None, "/orders/*", "generic"),
            route("wild", Some("*.example.com"), "/orders/*", "wild"),
            route("exact", Some("shop.example.com"), "/orders/*", "exact"),
        ]);

        assert_eq!(table.resolve("shop.example.com", "/orders/1").unwrap().route.upstream, "exact");
        assert_eq!(table.resolve("eu.example.com", "/orders/1").unwrap().route.upstream, "wild");
        assert_eq!(table.resolve("elsewhere.org", "/orders/1").unwrap().route.upstream, "generic");
    }

    #[test]
    fn test_tie_keeps_configuration_order() {
        let table = RouteTable::from_config(&[
            route("first", None, "/x/*", "first"),
            route("second", None, "/x/*", "second"),
        ]);

        assert_eq!(table.resolve("h", "/x/1").unwrap().route.name, "first");
    }

    #[test]
    fn test_exact_path_outranks_equal_prefix() {
        let table = RouteTable::from_config(&[
            route("prefix", None, "/status/*", "prefix"),
            route("exact", None, "/status", "exact"),
        ]);

        assert_eq!(table.resolve("h", "/status").unwrap().route.name, "exact");
        assert_eq!(table.resolve("h", "/status/deep").unwrap().route.name, "prefix");
    }

    #[test]
    fn test_rewrite() {
        let mut cfg = route("orders", Some("example.com"), "/orders/*", "orders-service");
        cfg.rewrite = Some("/api/v1/orders".into());
        let table = RouteTable::from_config(&[cfg]);

        let matched = table.resolve("example.com", "/orders/42").unwrap();
        assert_eq!(matched.forward_path, "/api/v1/orders/42");

        let matched = table.resolve("example.com", "/orders").unwrap();
        assert_eq!(matched.forward_path, "/api/v1/orders");
    }

    #[test]
    fn test_rewrite_to_root() {
        let mut cfg = route("strip", None, "/svc/*", "svc");
        cfg.rewrite = Some("/".into());
        let table = RouteTable::from_config(&[cfg]);

        assert_eq!(table.resolve("h", "/svc/items/3").unwrap().forward_path, "/items/3");
        assert_eq!(table.resolve("h", "/svc").unwrap().forward_path, "/");
    }

    #[test]
    fn test_without_rewrite_path_is_preserved() {
        let table = RouteTable::from_config(&[route("o", Some("example.com"), "/orders/*", "orders-service")]);
        assert_eq!(table.resolve("example.com", "/orders/42").unwrap().forward_path, "/orders/42");
    }

    #[test]
    fn test_upstream_services() {
        let table = RouteTable::from_config(&[
            route("a", None, "/a/*", "alpha"),
            route("b", None, "/b/*", "beta"),
            route("c", None, "/c/*", "alpha"),
        ]);
        let names: Vec<String> = table.upstream_services().into_iter().collect();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
