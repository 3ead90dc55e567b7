//! Sample backend that registers itself with the service registry.
//!
//! Serves a health endpoint for the registry's checker and echoes every
//! other request, then deregisters on SIGINT/SIGTERM.

use axum::extract::State;
use axum::http::{Method, Uri};
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use discovery_gateway::config::{load_or_default, ServiceConfig};
use discovery_gateway::lifecycle::shutdown::wait;
use discovery_gateway::lifecycle::signals::spawn_signal_handler;
use discovery_gateway::lifecycle::startup::{build_registry, resolve_advertise_address};
use discovery_gateway::lifecycle::Shutdown;
use discovery_gateway::observability::{logging, metrics};
use discovery_gateway::registration::{health_router, release_after_serve, RegistrationManager, ServiceHealth};
use discovery_gateway::registry::{authority, Registration};

#[derive(Parser)]
#[command(name = "sample-service")]
#[command(about = "Self-registering sample backend", long_about = None)]
struct Cli {
    /// Path to the service configuration (TOML). Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Clone)]
struct EchoState {
    service: String,
    instance_id: String,
}

async fn echo(State(state): State<EchoState>, method: Method, uri: Uri) -> Json<Value> {
    Json(json!({
        "service": state.service,
        "instance_id": state.instance_id,
        "method": method.as_str(),
        "path": uri.path(),
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config: ServiceConfig = load_or_default(cli.config.as_deref())?;

    logging::init_logging(&logging::default_directives(&config.observability.log_level));
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let bind: SocketAddr = config.service.bind_address.parse()?;
    let listener = TcpListener::bind(bind).await?;
    let local = listener.local_addr()?;
    let advertise = resolve_advertise_address(
        config.service.advertise_address.as_deref(),
        local,
        &config.registry.address,
    )?;

    let settings = &config.registration;
    let health_url = format!(
        "http://{}{}",
        authority(&advertise, local.port()),
        config.service.health_path
    );
    let registration = Registration::new(&config.service.name, advertise.as_str(), local.port())
        .with_tags(config.service.tags.clone())
        .with_health_check(
            health_url,
            Duration::from_secs(settings.check_interval_secs),
            Duration::from_secs(settings.check_timeout_secs),
        )
        .with_ttl(
            Duration::from_secs(settings.ttl_secs),
            Duration::from_secs(settings.deregister_critical_after_secs),
        );

    tracing::info!(
        service = %config.service.name,
        instance_id = %registration.service_id,
        listen = %local,
        advertise = %advertise,
        "sample-service starting"
    );

    let health = ServiceHealth::new();
    let echo_state = EchoState {
        service: config.service.name.clone(),
        instance_id: registration.service_id.clone(),
    };
    let registry = build_registry(&config.registry)?;
    let manager = Arc::new(RegistrationManager::new(
        registry,
        registration,
        settings.clone(),
        health.clone(),
    ));

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    let registration_task = tokio::spawn(manager.clone().run(shutdown.subscribe()));

    let app = health_router(&config.service.health_path, health)
        .merge(Router::new().fallback(echo).with_state(echo_state));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(wait(shutdown.subscribe()))
        .await;

    // Registration holds the deadline itself; the margin covers one in-flight call.
    let grace = settings.shutdown_deadline() + settings.call_timeout();
    release_after_serve(served, &shutdown, registration_task, grace).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
