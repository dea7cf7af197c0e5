//! # Request Logging Middleware
//!
//! Emits exactly one structured record per request after the inner handler
//! completes: method, path, status, duration and request id, at a severity
//! derived from the final status. Pure observability, no effect on control
//! flow.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{error, info, warn};

use super::request_id::request_id_of;

pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id_of(&request).unwrap_or_default().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    if status >= 500 {
        error!(
            method = %method,
            path = %path,
            status,
            duration_ms,
            request_id = %request_id,
            "request"
        );
    } else if status >= 400 {
        warn!(
            method = %method,
            path = %path,
            status,
            duration_ms,
            request_id = %request_id,
            "request"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status,
            duration_ms,
            request_id = %request_id,
            "request"
        );
    }

    response
}
