//! Upstream request forwarding.
//!
//! # Responsibilities
//! - Resolve the route, then an instance from the current snapshot
//! - Rewrite the URI and headers for the chosen instance
//! - Bound each attempt by the request timeout
//! - Replay safe requests once against a different instance
//! - Translate every failure into a client-facing [`ProxyError`]

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{RetryConfig, TimeoutConfig};
use crate::discovery::InstanceCache;
use crate::http::headers::prepare_upstream_headers;
use crate::http::request::request_id;
use crate::load_balancer::{InstanceSelector, SelectError};
use crate::observability::metrics;
use crate::registry::ServiceInstance;
use crate::resilience::retries::RetryPolicy;
use crate::routing::{normalize_host, NoRouteMatch, RouteTable};

/// Client-facing forwarding failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    NoRoute(#[from] NoRouteMatch),

    /// The registry has never reported this service.
    #[error("service '{0}' is not available")]
    UnknownService(String),

    #[error("no healthy instance of '{0}'")]
    NoHealthyInstance(String),

    #[error("upstream {instance} failed: {reason}")]
    Upstream { instance: String, reason: String },

    #[error("upstream {instance} timed out after {timeout_ms}ms")]
    UpstreamTimeout { instance: String, timeout_ms: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute(_) => StatusCode::NOT_FOUND,
            ProxyError::UnknownService(_) | ProxyError::NoHealthyInstance(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream { .. } | ProxyError::UpstreamTimeout { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<SelectError> for ProxyError {
    fn from(e: SelectError) -> Self {
        match e {
            SelectError::UnknownService(service) => ProxyError::UnknownService(service),
            SelectError::NoHealthyInstance(service) => ProxyError::NoHealthyInstance(service),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Request body, buffered only when a replay is possible.
enum Payload {
    Buffered(Bytes),
    Streaming(Option<Body>),
}

impl Payload {
    fn take(&mut self) -> Body {
        match self {
            Payload::Buffered(bytes) => Body::from(bytes.clone()),
            Payload::Streaming(body) => body.take().unwrap_or_else(Body::empty),
        }
    }
}

/// Relays requests to instances resolved through the registry.
#[derive(Debug)]
pub struct ProxyForwarder {
    routes: Arc<RouteTable>,
    cache: Arc<InstanceCache>,
    selector: Arc<InstanceSelector>,
    client: Client<HttpConnector, Body>,
    retry: RetryPolicy,
    request_timeout: Duration,
    max_body_size: usize,
    proto: &'static str,
}

impl ProxyForwarder {
    pub fn new(
        routes: Arc<RouteTable>,
        cache: Arc<InstanceCache>,
        selector: Arc<InstanceSelector>,
        timeouts: &TimeoutConfig,
        retries: &RetryConfig,
        max_body_size: usize,
        tls: bool,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            routes,
            cache,
            selector,
            client,
            retry: RetryPolicy::new(retries),
            request_timeout: Duration::from_secs(timeouts.request_secs),
            max_body_size,
            proto: if tls { "https" } else { "http" },
        }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn cache(&self) -> &Arc<InstanceCache> {
        &self.cache
    }

    /// Forward one inbound request and return the upstream response unmodified.
    pub async fn forward(&self, request: Request<Body>, client_addr: SocketAddr) -> Result<Response<Body>, ProxyError> {
        let start = Instant::now();
        let method = request.method().clone();

        let result = self.forward_inner(request, client_addr).await;
        match &result {
            Ok((response, upstream)) => {
                metrics::record_request(method.as_str(), response.status().as_u16(), upstream, start)
            }
            Err((e, upstream)) => metrics::record_request(method.as_str(), e.status().as_u16(), upstream, start),
        }
        result.map(|(response, _)| response).map_err(|(e, _)| e)
    }

    async fn forward_inner(
        &self,
        request: Request<Body>,
        client_addr: SocketAddr,
    ) -> Result<(Response<Body>, String), (ProxyError, String)> {
        let (mut parts, body) = request.into_parts();
        let request_id = request_id(&parts.headers).to_string();
        let host = inbound_host(&parts.headers, &parts.uri);

        let matched = self
            .routes
            .resolve(&host, parts.uri.path())
            .map_err(|e| (ProxyError::from(e), "none".to_string()))?;
        let route = matched.route;
        let upstream = route.upstream.clone();
        let fail = |e: ProxyError| (e, upstream.clone());

        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{}?{}", matched.forward_path, query),
            None => matched.forward_path.clone(),
        };

        let snapshot = self.cache.current_for(&upstream).await;
        let mut instance = self.selector.select(&snapshot, &upstream).map_err(|e| {
            tracing::warn!(request_id = %request_id, upstream = %upstream, error = %e, "No instance to forward to");
            fail(e.into())
        })?;

        prepare_upstream_headers(&mut parts.headers, client_addr.ip(), self.proto);

        let attempts = self.retry.max_attempts(&parts.method);
        let mut payload = if attempts > 1 {
            let bytes = axum::body::to_bytes(body, self.max_body_size)
                .await
                .map_err(|e| fail(ProxyError::InvalidRequest(e.to_string())))?;
            Payload::Buffered(bytes)
        } else {
            Payload::Streaming(Some(body))
        };

        tracing::debug!(
            request_id = %request_id,
            route = %route.name,
            upstream = %upstream,
            instance_id = %instance.id,
            path = %path_and_query,
            "Forwarding request"
        );

        let mut attempt = 1;
        loop {
            let uri = upstream_uri(&instance, &path_and_query).map_err(fail)?;
            let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
            if let Some(headers) = builder.headers_mut() {
                headers.extend(parts.headers.clone());
            }
            let outbound = builder
                .body(payload.take())
                .map_err(|e| fail(ProxyError::InvalidRequest(e.to_string())))?;

            let error = match tokio::time::timeout(self.request_timeout, self.client.request(outbound)).await {
                Ok(Ok(response)) => {
                    let (head, body) = response.into_parts();
                    return Ok((Response::from_parts(head, Body::new(body)), upstream.clone()));
                }
                Ok(Err(e)) => ProxyError::Upstream {
                    instance: instance.authority(),
                    reason: e.to_string(),
                },
                Err(_) => ProxyError::UpstreamTimeout {
                    instance: instance.authority(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                },
            };

            tracing::warn!(
                request_id = %request_id,
                upstream = %upstream,
                instance_id = %instance.id,
                attempt,
                error = %error,
                "Upstream attempt failed"
            );

            if attempt >= attempts {
                return Err(fail(error));
            }
            match self.selector.select_excluding(&snapshot, &upstream, &instance.id) {
                Ok(next) => {
                    tracing::info!(
                        request_id = %request_id,
                        upstream = %upstream,
                        instance_id = %next.id,
                        "Retrying on another instance"
                    );
                    instance = next;
                    attempt += 1;
                }
                Err(_) => return Err(fail(error)),
            }
        }
    }
}

/// Host the client addressed: `Host` header, else the URI authority (HTTP/2).
fn inbound_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .map(normalize_host)
        .unwrap_or_default()
}

fn upstream_uri(instance: &ServiceInstance, path_and_query: &str) -> Result<Uri, ProxyError> {
    Uri::builder()
        .scheme("http")
        .authority(instance.authority())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
}
