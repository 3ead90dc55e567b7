//! Discovery gateway.
//!
//! A reverse proxy whose routing table resolves against a live service
//! registry instead of a fixed backend list.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ RouteTable ──▶ InstanceCache ──▶ InstanceSelector
//!                                                         ▲                   │
//!                                                         │ refresh           ▼
//!                                                  RegistryClient      ProxyForwarder ──▶ Instance
//!                                                         │
//!                                                         ▼
//!                                                 Service registry ◀── RegistrationManager
//!                                                                       (each backend)
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use discovery_gateway::config::{load_or_default, GatewayConfig};
use discovery_gateway::lifecycle::signals::spawn_signal_handler;
use discovery_gateway::lifecycle::startup::build_registry;
use discovery_gateway::lifecycle::Shutdown;
use discovery_gateway::observability::{logging, metrics};
use discovery_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "discovery-gateway")]
#[command(about = "Registry-backed dynamic reverse proxy", long_about = None)]
struct Cli {
    /// Path to the gateway configuration (TOML). Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config: GatewayConfig = load_or_default(cli.config.as_deref())?;

    logging::init_logging(&logging::default_directives(&config.observability.log_level));
    tracing::info!("discovery-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        registry = %config.registry.address,
        routes = config.routes.len(),
        refresh_interval_ms = config.discovery.refresh_interval_ms,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = build_registry(&config.registry)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let server = GatewayServer::new(config, registry);
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
