//! # Request Metrics
//!
//! Counts every HTTP request by method and status class through the
//! `metrics` facade. Without an installed recorder this is a no-op.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::metrics::record_http_request;

/// Middleware that records one request counter per response.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();

    let response = next.run(request).await;

    record_http_request(method, response.status().as_u16());
    response
}
