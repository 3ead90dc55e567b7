//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Compose route table, instance cache, selector and forwarder
//! - Wire up middleware (request ID, tracing, body limit)
//! - Start one refresh task per upstream service
//! - Serve plain HTTP or TLS until shutdown

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    Router,
};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::discovery::InstanceCache;
use crate::http::forwarder::{ProxyError, ProxyForwarder};
use crate::http::request::X_REQUEST_ID;
use crate::lifecycle::shutdown::{self, Shutdown};
use crate::load_balancer::InstanceSelector;
use crate::net::tls::load_tls_config;
use crate::registry::RegistryClient;
use crate::routing::RouteTable;

/// In-flight connections get this long to finish on a TLS listener.
const TLS_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// The gateway's HTTP front end.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    forwarder: Arc<ProxyForwarder>,
}

impl GatewayServer {
    /// Build every gateway component from `config` on top of `registry`.
    pub fn new(config: GatewayConfig, registry: Arc<dyn RegistryClient>) -> Self {
        let routes = Arc::new(RouteTable::from_config(&config.routes));
        let cache = Arc::new(InstanceCache::new(
            registry,
            &config.discovery,
            config.registry.timeout(),
        ));
        let selector = Arc::new(InstanceSelector::new(config.discovery.policy));

        let forwarder = Arc::new(ProxyForwarder::new(
            routes,
            cache,
            selector,
            &config.timeouts,
            &config.retries,
            config.listener.max_body_size,
            config.listener.tls.is_some(),
        ));

        let router = Self::build_router(&config, forwarder.clone());
        Self {
            router,
            config,
            forwarder,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, forwarder: Arc<ProxyForwarder>) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(forwarder)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_size)),
            )
    }

    pub fn forwarder(&self) -> &Arc<ProxyForwarder> {
        &self.forwarder
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, then stop the refresh tasks.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> io::Result<()> {
        let Self {
            router,
            config,
            forwarder,
        } = self;
        let addr = listener.local_addr()?;

        let services = forwarder.routes().upstream_services();
        tracing::info!(
            address = %addr,
            routes = forwarder.routes().routes().len(),
            upstreams = services.len(),
            tls = config.listener.tls.is_some(),
            "Gateway starting"
        );
        let refreshers = forwarder.cache().spawn_refresh(services, &shutdown);

        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let served = match &config.listener.tls {
            None => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown::wait(shutdown.subscribe()))
                    .await
            }
            Some(tls) => {
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                let signal = shutdown.subscribe();
                tokio::spawn(async move {
                    shutdown::wait(signal).await;
                    drain.graceful_shutdown(Some(TLS_DRAIN_GRACE));
                });
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await
            }
        };

        // The listener may also stop on an error; refresh tasks go with it.
        shutdown.trigger();
        for handle in refreshers {
            let _ = handle.await;
        }

        tracing::info!("Gateway stopped");
        served
    }
}

/// Catch-all handler: every request goes through the forwarder.
async fn proxy_handler(
    State(forwarder): State<Arc<ProxyForwarder>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    forwarder.forward(request, client).await
}
