//! Request inspection.
//!
//! # Responsibilities
//! - Read the request ID set by the request-id layer
//! - Split the API version off the path (or take it from a header)
//! - Extract the caller identity used for rate limiting
//!
//! # Design Decisions
//! - A leading `/vN` path segment wins over the `x-api-version` header
//! - Caller IP is the peer address; forwarded headers are not trusted

use std::net::SocketAddr;
use axum::http::{HeaderMap, HeaderName};
use uuid::Uuid;

use crate::security::rate_limit::CallerIdentity;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_API_VERSION: HeaderName = HeaderName::from_static("x-api-version");
pub const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// The request ID, or a fresh one if the layer did not run.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Split `/v2/users/1` into `("v2", "/users/1")`.
///
/// Without a version segment the header is used, then `default`.
pub fn split_version(path: &str, headers: &HeaderMap, default: &str) -> (String, String) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (first, rest) = match trimmed.find('/') {
        Some(i) => (&trimmed[..i], &trimmed[i..]),
        None => (trimmed, "/"),
    };
    if is_version_segment(first) {
        return (first.to_string(), rest.to_string());
    }

    let version = headers
        .get(X_API_VERSION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default);
    (version.to_string(), path.to_string())
}

fn is_version_segment(segment: &str) -> bool {
    segment.len() > 1
        && segment.starts_with('v')
        && segment[1..].bytes().all(|b| b.is_ascii_digit())
}

/// Identity of the caller from headers and the peer address.
pub fn caller_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> CallerIdentity {
    let header = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    CallerIdentity {
        api_key: header(&X_API_KEY),
        user_id: header(&X_USER_ID),
        ip: peer.map(|addr| addr.ip().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_version_from_path() {
        let headers = HeaderMap::new();
        assert_eq!(
            split_version("/v2/users/1", &headers, "v1"),
            ("v2".to_string(), "/users/1".to_string())
        );
        assert_eq!(split_version("/v3", &headers, "v1"), ("v3".to_string(), "/".to_string()));
        assert_eq!(
            split_version("/videos/1", &headers, "v1"),
            ("v1".to_string(), "/videos/1".to_string())
        );
    }

    #[test]
    fn test_version_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(X_API_VERSION, HeaderValue::from_static("v7"));
        assert_eq!(
            split_version("/users", &headers, "v1"),
            ("v7".to_string(), "/users".to_string())
        );
        // Path segment wins
        assert_eq!(split_version("/v2/users", &headers, "v1").0, "v2");
    }

    #[test]
    fn test_caller_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(X_API_KEY, HeaderValue::from_static("k1"));
        headers.insert(X_USER_ID, HeaderValue::from_static(" "));
        let caller = caller_identity(&headers, Some("10.1.2.3:5555".parse().unwrap()));
        assert_eq!(caller.api_key.as_deref(), Some("k1"));
        assert_eq!(caller.user_id, None);
        assert_eq!(caller.ip.as_deref(), Some("10.1.2.3"));
    }

    #[test]
    fn test_request_id_fallback() {
        let id = request_id(&HeaderMap::new());
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
