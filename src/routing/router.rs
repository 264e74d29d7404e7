//! Endpoint lookup.
//!
//! # Responsibilities
//! - Store resolved endpoints with their effective settings
//! - Look up the endpoint for `(path, method, version)`
//! - Return the matched endpoint or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction; replaced wholesale on reload
//! - O(1) exact lookup via HashMap, tried first
//! - O(n) pattern scan in registration order; first match wins

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::{
    BalanceStrategy, CircuitBreakerConfig, EndpointConfig, RateLimitPolicy,
};
use crate::routing::matcher::PathPattern;

/// Settings applied when an endpoint does not override them.
#[derive(Debug, Clone, Default)]
pub struct EndpointDefaults {
    /// Applied only when set (rate limiting enabled globally).
    pub rate_limit: Option<RateLimitPolicy>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub strategy: BalanceStrategy,
    pub timeout: Duration,
}

/// An endpoint with every setting resolved.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// `METHOD version path`.
    pub id: String,
    pub path: String,
    pub method: String,
    pub version: String,
    pub rate_limit: Option<RateLimitPolicy>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub strategy: BalanceStrategy,
    pub timeout: Duration,
}

impl Endpoint {
    pub fn resolve(config: &EndpointConfig, defaults: &EndpointDefaults) -> Self {
        Self {
            id: config.id(),
            path: config.path.clone(),
            method: config.method.to_ascii_uppercase(),
            version: config.version.clone(),
            rate_limit: config.rate_limit.clone().or_else(|| defaults.rate_limit.clone()),
            circuit_breaker: config
                .circuit_breaker
                .clone()
                .unwrap_or_else(|| defaults.circuit_breaker.clone()),
            strategy: config.strategy.unwrap_or(defaults.strategy),
            timeout: config
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }
}

#[derive(Debug)]
struct PatternRoute {
    pattern: PathPattern,
    endpoint: Arc<Endpoint>,
}

/// Compiled endpoint table.
#[derive(Debug, Default)]
pub struct EndpointRouter {
    exact: HashMap<(String, String, String), Arc<Endpoint>>,
    patterns: Vec<PatternRoute>,
    by_id: HashMap<String, Arc<Endpoint>>,
    /// Registration order.
    ordered: Vec<Arc<Endpoint>>,
}

impl EndpointRouter {
    /// Build a router. Later duplicates of an endpoint id are ignored.
    pub fn new(configs: &[EndpointConfig], defaults: &EndpointDefaults) -> Self {
        let mut router = Self::default();
        for config in configs {
            let endpoint = Arc::new(Endpoint::resolve(config, defaults));
            if router.by_id.contains_key(&endpoint.id) {
                tracing::warn!(endpoint = %endpoint.id, "Duplicate endpoint ignored");
                continue;
            }

            router.exact.insert(
                (endpoint.method.clone(), endpoint.version.clone(), endpoint.path.clone()),
                endpoint.clone(),
            );
            if !PathPattern::is_literal(&endpoint.path) {
                match PathPattern::compile(&endpoint.path) {
                    Ok(pattern) => router.patterns.push(PatternRoute {
                        pattern,
                        endpoint: endpoint.clone(),
                    }),
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint.id, error = %e, "Invalid path pattern, exact match only");
                    }
                }
            }
            router.by_id.insert(endpoint.id.clone(), endpoint.clone());
            router.ordered.push(endpoint);
        }
        router
    }

    /// Find the endpoint for a request.
    pub fn resolve(&self, path: &str, method: &str, version: &str) -> Option<Arc<Endpoint>> {
        let method = method.to_ascii_uppercase();
        let key = (method, version.to_string(), path.to_string());
        if let Some(endpoint) = self.exact.get(&key) {
            return Some(endpoint.clone());
        }
        let (method, version, path) = key;

        self.patterns
            .iter()
            .filter(|r| r.endpoint.method == method && r.endpoint.version == version)
            .find(|r| r.pattern.matches(&path))
            .map(|r| r.endpoint.clone())
    }

    pub fn get(&self, endpoint_id: &str) -> Option<Arc<Endpoint>> {
        self.by_id.get(endpoint_id).cloned()
    }

    /// Endpoints in registration order.
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
