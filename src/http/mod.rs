//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing, body limit)
//!     → forwarder.rs (route → snapshot → instance)
//!     → headers.rs (hop-by-hop stripped, X-Forwarded-* added)
//!     → upstream instance
//!     → response returned unmodified
//! ```

pub mod forwarder;
pub mod headers;
pub mod request;
pub mod server;

pub use forwarder::{ProxyError, ProxyForwarder};
pub use request::X_REQUEST_ID;
pub use server::GatewayServer;
