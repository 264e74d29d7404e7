//! Fixed-window rate limiting backed by the shared state store.
//!
//! A request increments the counter of the window it falls into; the bucket
//! key is `rate_limit:<key>:<floor(now / window)>`. The first increment of a
//! bucket sets its TTL so buckets expire on their own.
//!
//! Fixed windows allow a caller up to `2 * max_requests` across the boundary
//! of two adjacent windows. That burst is accepted.

use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;

use crate::clock::now_millis;
use crate::config::schema::{RateLimitPolicy, RateLimitScope};
use crate::observability::metrics;
use crate::store::StateStore;

const KEY_PREFIX: &str = "rate_limit";

/// Builders for rate-limit keys, one per scope.
pub struct RateLimitKey;

impl RateLimitKey {
    pub fn api_key(key: &str) -> String {
        format!("apikey:{}", key)
    }

    pub fn user(id: &str) -> String {
        format!("user:{}", id)
    }

    pub fn ip(addr: &str) -> String {
        format!("ip:{}", addr)
    }

    pub fn endpoint(method: &str, path: &str) -> String {
        format!("endpoint:{}:{}", method.to_ascii_uppercase(), path)
    }
}

/// Who is calling, as far as the gateway can tell.
#[derive(Debug, Clone, Default)]
pub struct CallerIdentity {
    pub api_key: Option<String>,
    pub user_id: Option<String>,
    pub ip: Option<String>,
}

impl CallerIdentity {
    /// Key for `scope`. Falls back to the IP scope when the caller does not
    /// carry the identity the scope needs.
    pub fn key_for(&self, scope: RateLimitScope, method: &str, path: &str) -> String {
        let preferred = match scope {
            RateLimitScope::ApiKey => self.api_key.as_deref().map(RateLimitKey::api_key),
            RateLimitScope::User => self.user_id.as_deref().map(RateLimitKey::user),
            RateLimitScope::Endpoint => Some(RateLimitKey::endpoint(method, path)),
            RateLimitScope::Ip => None,
        };
        preferred.unwrap_or_else(|| RateLimitKey::ip(self.ip.as_deref().unwrap_or("unknown")))
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// End of the current window, milliseconds since the Unix epoch.
    pub reset_time: u64,
    pub total_hits: u64,
}

impl RateLimitResult {
    /// Seconds until the window resets, rounded up, at least 1.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_time.saturating_sub(now_ms).div_ceil(1000).max(1)
    }

    /// Window reset as Unix seconds.
    pub fn reset_secs(&self) -> u64 {
        self.reset_time.div_ceil(1000)
    }
}

/// Store-backed fixed-window limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Count one request against `key` and report whether it is allowed.
    ///
    /// Never fails: store errors are logged and the request is allowed.
    pub async fn check_and_increment(
        &self,
        key: &str,
        window_ms: u64,
        max_requests: u64,
    ) -> RateLimitResult {
        self.check_and_increment_at(key, window_ms, max_requests, now_millis())
            .await
    }

    /// Same as `check_and_increment` with an explicit clock reading.
    pub async fn check_and_increment_at(
        &self,
        key: &str,
        window_ms: u64,
        max_requests: u64,
        now_ms: u64,
    ) -> RateLimitResult {
        let window_ms = window_ms.max(1);
        let window = now_ms / window_ms;
        let reset_time = (window + 1) * window_ms;
        let bucket = format!("{}:{}:{}", KEY_PREFIX, key, window);

        let count = match self.store.incr(&bucket).await {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Rate limit store error, allowing request");
                metrics::record_store_error("rate_limit");
                return RateLimitResult {
                    allowed: true,
                    limit: max_requests,
                    remaining: max_requests,
                    reset_time,
                    total_hits: 0,
                };
            }
        };

        if count == 1 {
            let ttl = Duration::from_secs(window_ms.div_ceil(1000));
            if let Err(e) = self.store.expire(&bucket, ttl).await {
                tracing::warn!(key = %key, error = %e, "Failed to set rate limit window TTL");
                metrics::record_store_error("rate_limit");
            }
        }

        let allowed = count <= max_requests;
        if !allowed {
            tracing::debug!(key = %key, count, limit = max_requests, "Rate limit exceeded");
        }

        RateLimitResult {
            allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(count),
            reset_time,
            total_hits: count,
        }
    }

    /// Check a request against a policy for the given caller and endpoint.
    pub async fn check_policy(
        &self,
        policy: &RateLimitPolicy,
        caller: &CallerIdentity,
        method: &str,
        path: &str,
    ) -> RateLimitResult {
        let key = caller.key_for(policy.scope, method, path);
        let result = self
            .check_and_increment(&key, policy.window_ms, policy.max_requests)
            .await;
        if !result.allowed {
            metrics::record_rate_limited(scope_label(policy.scope));
        }
        result
    }
}

fn scope_label(scope: RateLimitScope) -> &'static str {
    match scope {
        RateLimitScope::ApiKey => "api_key",
        RateLimitScope::User => "user",
        RateLimitScope::Ip => "ip",
        RateLimitScope::Endpoint => "endpoint",
    }
}
