//! Response construction.
//!
//! # Responsibilities
//! - Map admission rejections to status codes and JSON bodies
//! - Attach rate-limit headers
//! - Strip hop-by-hop headers from upstream responses
//!
//! # Design Decisions
//! - Upstream timeouts result in 504 Gateway Timeout, connection errors in 502
//! - No internal error detail reaches the client

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::clock::now_millis;
use crate::gateway::Rejection;
use crate::security::rate_limit::RateLimitResult;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Add `X-RateLimit-Limit`, `-Remaining` and `-Reset` (Unix seconds).
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_secs()));
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

pub fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::NotFound { .. } => {
                error_response(StatusCode::NOT_FOUND, "not_found", &self.to_string())
            }
            Rejection::RateLimited(result) => {
                let retry_after = result.retry_after_secs(now_millis());
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": "rate_limited",
                        "message": "Rate limit exceeded",
                        "retryAfter": retry_after,
                    })),
                )
                    .into_response();
                let headers = response.headers_mut();
                apply_rate_limit_headers(headers, &result);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            Rejection::NoHealthyInstance { .. } => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "No healthy upstream instance available",
            ),
        }
    }
}
