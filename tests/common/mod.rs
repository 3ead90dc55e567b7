//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use discovery_gateway::config::{GatewayConfig, RouteConfig};
use discovery_gateway::lifecycle::Shutdown;
use discovery_gateway::registry::RegistryClient;
use discovery_gateway::GatewayServer;

/// Read a request head (up to the blank line).
async fn read_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Start a backend answering `"<name> <path>"` and echoing forwarding headers.
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let mut lines = head.split("\r\n");
                        let target = lines
                            .next()
                            .and_then(|line| line.split_whitespace().nth(1))
                            .unwrap_or("/")
                            .to_string();
                        let headers: Vec<(String, String)> = lines
                            .filter_map(|line| line.split_once(':'))
                            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                            .collect();
                        let seen = |name: &str| -> String {
                            headers
                                .iter()
                                .find(|(k, _)| k == name)
                                .map(|(_, v)| v.clone())
                                .unwrap_or_default()
                        };

                        let body = format!("{} {}", name, target);
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Backend: {}\r\nX-Seen-Forwarded-Host: {}\r\nX-Seen-Forwarded-For: {}\r\nX-Seen-Request-Id: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            name,
                            seen("x-forwarded-host"),
                            seen("x-forwarded-for"),
                            seen("x-request-id"),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a backend that reads each request and never answers it.
pub async fn start_hung_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_head(&mut socket).await;
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(socket);
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn route(name: &str, host: Option<&str>, path: &str, upstream: &str, rewrite: Option<&str>) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        host: host.map(str::to_string),
        path: path.to_string(),
        upstream: upstream.to_string(),
        rewrite: rewrite.map(str::to_string),
    }
}

/// Gateway config with short refresh and timeouts for tests.
pub fn gateway_config(routes: Vec<RouteConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.routes = routes;
    config.discovery.refresh_interval_ms = 50;
    config.discovery.failure_ceiling = 2;
    config.timeouts.connect_secs = 1;
    config.timeouts.request_secs = 2;
    config
}

/// Start a gateway on an ephemeral port.
pub async fn start_gateway(
    config: GatewayConfig,
    registry: Arc<dyn RegistryClient>,
) -> (SocketAddr, Shutdown, JoinHandle<std::io::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config, registry);
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));
    (addr, shutdown, handle)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// State of the mock Consul agent.
#[derive(Debug, Default)]
pub struct ConsulState {
    /// Registration bodies by service id.
    pub services: Mutex<BTreeMap<String, Value>>,
    /// Ids whose heartbeat check was failed.
    pub critical: Mutex<BTreeSet<String>>,
    /// Ids removed by deregister calls, in order.
    pub deregistered: Mutex<Vec<String>>,
    /// (verb, service id) for each check update.
    pub check_updates: Mutex<Vec<(String, String)>>,
    /// Tokens presented on register calls.
    pub tokens: Mutex<Vec<String>>,
}

/// Start an HTTP server speaking the subset of the Consul agent API the client uses.
pub async fn start_mock_consul() -> (SocketAddr, Arc<ConsulState>) {
    let state = Arc::new(ConsulState::default());
    let app = Router::new()
        .route("/v1/health/service/{name}", get(consul_health))
        .route("/v1/agent/service/register", put(consul_register))
        .route("/v1/agent/service/deregister/{id}", put(consul_deregister))
        .route("/v1/agent/service/{id}", get(consul_service))
        .route("/v1/agent/check/{verb}/{check_id}", put(consul_check))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, state)
}

async fn consul_health(
    State(state): State<Arc<ConsulState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let passing_only = params.get("passing").map(|v| v == "true").unwrap_or(false);
    let critical = state.critical.lock().unwrap().clone();
    let entries: Vec<Value> = state
        .services
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, body)| body["Name"] == name.as_str())
        .filter(|(id, _)| !passing_only || !critical.contains(*id))
        .map(|(id, body)| {
            json!({
                "Node": {"Node": "mock-node", "Address": "127.0.0.1"},
                "Service": {
                    "ID": id,
                    "Service": body["Name"],
                    "Address": body["Address"],
                    "Port": body["Port"],
                    "Tags": body["Tags"],
                },
                "Checks": [{"Status": "passing"}],
            })
        })
        .collect();
    Json(Value::Array(entries))
}

async fn consul_register(
    State(state): State<Arc<ConsulState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if let Some(token) = headers.get("x-consul-token").and_then(|v| v.to_str().ok()) {
        state.tokens.lock().unwrap().push(token.to_string());
    }
    let Some(id) = body["ID"].as_str().map(str::to_string) else {
        return StatusCode::BAD_REQUEST;
    };
    state.services.lock().unwrap().insert(id, body);
    StatusCode::OK
}

async fn consul_service(State(state): State<Arc<ConsulState>>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    state
        .services
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn consul_deregister(State(state): State<Arc<ConsulState>>, Path(id): Path<String>) -> StatusCode {
    if state.services.lock().unwrap().remove(&id).is_some() {
        state.deregistered.lock().unwrap().push(id);
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn consul_check(
    State(state): State<Arc<ConsulState>>,
    Path((verb, check_id)): Path<(String, String)>,
) -> StatusCode {
    let id = check_id
        .strip_prefix("service:")
        .and_then(|rest| rest.strip_suffix(":ttl"))
        .unwrap_or(&check_id)
        .to_string();
    if !state.services.lock().unwrap().contains_key(&id) {
        return StatusCode::NOT_FOUND;
    }

    if verb == "fail" {
        state.critical.lock().unwrap().insert(id.clone());
    } else {
        state.critical.lock().unwrap().remove(&id);
    }
    state.check_updates.lock().unwrap().push((verb, id));
    StatusCode::OK
}
