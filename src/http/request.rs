//! Request identification.
//!
//! # Responsibilities
//! - Name the request id header shared by the id layer and the forwarder
//! - Read the id back for log fields
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The id travels upstream unchanged; responses are not annotated

use axum::http::header::{HeaderMap, HeaderName};

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// The request id in `headers`, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_id_lookup() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), "unknown");

        headers.insert(X_REQUEST_ID, HeaderValue::from_static("req-1"));
        assert_eq!(request_id(&headers), "req-1");
    }
}
