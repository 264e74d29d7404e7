//! Request admission and outcome reporting.
//!
//! # Data Flow
//! ```text
//! RouteRequest (path, method, version, caller)
//!     → LoadBalancer::resolve      (404 if no endpoint)
//!     → RateLimiter::check_policy  (429 if over limit, fail-open on store errors)
//!     → LoadBalancer::select_for   (health + circuit filtering, strategy; 503 if none)
//!     → ServiceInstance::acquire   (connection guard)
//!     → Admission
//!
//! Upstream call completes
//!     → report(Admission, Outcome) → CircuitBreaker success / failure
//! ```
//!
//! # Design Decisions
//! - The gateway owns every core component; nothing is a process global
//! - Circuit identity is the backend instance id on every path
//! - Only routing errors reach the caller; store trouble never does

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::schema::{EndpointConfig, GatewayConfig};
use crate::health::{HealthHistory, HealthMonitor, Outcome};
use crate::load_balancer::{ConnectionGuard, LoadBalancer, RouteError, ServiceInstance};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::routing::{Endpoint, EndpointDefaults};
use crate::security::rate_limit::{CallerIdentity, RateLimitResult, RateLimiter};
use crate::store::StateStore;

/// One inbound request as the core sees it.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// Path without the version prefix.
    pub path: String,
    pub method: String,
    pub version: String,
    pub caller: CallerIdentity,
}

/// A request cleared to go upstream.
///
/// Holds the instance's connection slot until dropped.
#[derive(Debug)]
pub struct Admission {
    pub endpoint: Arc<Endpoint>,
    pub connection: ConnectionGuard,
    /// Present when the endpoint is rate limited.
    pub rate_limit: Option<RateLimitResult>,
}

impl Admission {
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        self.connection.instance()
    }
}

/// Why a request was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no endpoint for {method} {version} {path}")]
    NotFound {
        method: String,
        version: String,
        path: String,
    },

    #[error("rate limit exceeded")]
    RateLimited(RateLimitResult),

    #[error("no healthy instance for endpoint {endpoint}")]
    NoHealthyInstance { endpoint: String },
}

impl From<RouteError> for Rejection {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::EndpointNotFound {
                method,
                version,
                path,
            } => Rejection::NotFound {
                method,
                version,
                path,
            },
            RouteError::NoHealthyInstance { endpoint } => Rejection::NoHealthyInstance { endpoint },
        }
    }
}

/// The traffic-control core.
#[derive(Debug)]
pub struct Gateway {
    store: Arc<dyn StateStore>,
    rate_limiter: RateLimiter,
    breaker: Arc<CircuitBreaker>,
    balancer: LoadBalancer,
    default_version: String,
}

impl Gateway {
    /// Build the core and start health checks for every configured instance.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn StateStore>,
        history: Arc<dyn HealthHistory>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(store.clone()));
        let monitor = Arc::new(HealthMonitor::new(
            config.health_check.clone(),
            breaker.clone(),
            history,
        ));
        let defaults = EndpointDefaults {
            rate_limit: config
                .rate_limit
                .enabled
                .then(|| config.rate_limit.default_policy.clone()),
            circuit_breaker: config.circuit_breaker.clone(),
            strategy: config.load_balancer.strategy,
            timeout: Duration::from_millis(config.timeouts.request_ms),
        };

        let balancer = LoadBalancer::new(defaults, breaker.clone(), monitor);
        balancer.sync_endpoints(&config.endpoints);

        Self {
            rate_limiter: RateLimiter::new(store.clone()),
            store,
            breaker,
            balancer,
            default_version: config.listener.default_version.clone(),
        }
    }

    /// Decide whether a request may go upstream, and where.
    pub async fn admit(&self, request: &RouteRequest) -> Result<Admission, Rejection> {
        let endpoint = self
            .balancer
            .resolve(&request.path, &request.method, &request.version)
            .ok_or_else(|| Rejection::NotFound {
                method: request.method.to_ascii_uppercase(),
                version: request.version.clone(),
                path: request.path.clone(),
            })?;

        let rate_limit = match &endpoint.rate_limit {
            Some(policy) => {
                let result = self
                    .rate_limiter
                    .check_policy(policy, &request.caller, &endpoint.method, &endpoint.path)
                    .await;
                if !result.allowed {
                    tracing::debug!(endpoint = %endpoint.id, "Request rate limited");
                    return Err(Rejection::RateLimited(result));
                }
                Some(result)
            }
            None => None,
        };

        let selection = self.balancer.select_for(endpoint).await?;
        Ok(Admission {
            connection: selection.instance.acquire(),
            endpoint: selection.endpoint,
            rate_limit,
        })
    }

    /// Feed the result of an upstream call into the instance's breaker.
    pub async fn report(&self, admission: &Admission, outcome: Outcome) {
        let instance = admission.instance();
        let config = &admission.endpoint.circuit_breaker;
        if outcome.is_failure() {
            tracing::debug!(instance = %instance.id, outcome = ?outcome, "Upstream failure recorded");
            self.breaker.record_failure(&instance.id, config).await;
        } else {
            self.breaker.record_success(&instance.id, config).await;
        }
    }

    /// Apply a new endpoint set.
    pub fn reload(&self, endpoints: &[EndpointConfig]) {
        self.balancer.sync_endpoints(endpoints);
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Stop background work.
    pub fn shutdown(&self) {
        self.balancer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use crate::config::schema::{
        CircuitBreakerConfig, HealthCheckConfig, RateLimitPolicy, RateLimitScope, Target,
    };
    use crate::health::InMemoryHealthHistory;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::store::MemoryStore;

    fn config(endpoints: Vec<EndpointConfig>) -> GatewayConfig {
        GatewayConfig {
            health_check: HealthCheckConfig {
                enabled: false,
                ..Default::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                timeout_ms: 60_000,
                monitoring_period_ms: 60_000,
            },
            endpoints,
            ..Default::default()
        }
    }

    fn gateway(endpoints: Vec<EndpointConfig>) -> Gateway {
        Gateway::new(
            &config(endpoints),
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryHealthHistory::new(10)),
        )
    }

    fn endpoint(path: &str) -> EndpointConfig {
        EndpointConfig {
            path: path.into(),
            method: "GET".into(),
            version: "v1".into(),
            target: Target::Raw("http://127.0.0.1:9".into()),
            rate_limit: None,
            circuit_breaker: None,
            strategy: None,
            timeout_ms: None,
        }
    }

    fn request(path: &str, api_key: Option<&str>) -> RouteRequest {
        RouteRequest {
            path: path.into(),
            method: "GET".into(),
            version: "v1".into(),
            caller: CallerIdentity {
                api_key: api_key.map(String::from),
                user_id: None,
                ip: Some("10.0.0.1".into()),
            },
        }
    }

    #[tokio::test]
    async fn test_admit_counts_connection() {
        let gw = gateway(vec![endpoint("/users/:id")]);
        let admission = gw.admit(&request("/users/9", None)).await.unwrap();
        assert_eq!(admission.instance().connections(), 1);
        assert!(admission.rate_limit.is_none());

        let instance = admission.instance().clone();
        drop(admission);
        assert_eq!(instance.connections(), 0);
    }

    #[tokio::test]
    async fn test_not_found() {
        let gw = gateway(vec![endpoint("/users")]);
        let err = gw.admit(&request("/orders", None)).await.unwrap_err();
        assert!(matches!(err, Rejection::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_per_api_key() {
        let mut e = endpoint("/x");
        e.rate_limit = Some(RateLimitPolicy {
            window_ms: 60_000,
            max_requests: 2,
            scope: RateLimitScope::ApiKey,
        });
        let gw = gateway(vec![e]);

        for _ in 0..2 {
            let admission = gw.admit(&request("/x", Some("k1"))).await.unwrap();
            assert!(admission.rate_limit.unwrap().allowed);
        }
        match gw.admit(&request("/x", Some("k1"))).await.unwrap_err() {
            Rejection::RateLimited(result) => {
                assert_eq!(result.remaining, 0);
                assert_eq!(result.limit, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        // Another key has its own window
        assert!(gw.admit(&request("/x", Some("k2"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_failures_open_circuit_then_503() {
        let gw = gateway(vec![endpoint("/x")]);
        for _ in 0..2 {
            let admission = gw.admit(&request("/x", None)).await.unwrap();
            gw.report(&admission, Outcome::Status(StatusCode::BAD_GATEWAY)).await;
        }

        let state = gw.breaker().get_state("http://127.0.0.1:9").await;
        assert_eq!(state.state, CircuitState::Open);
        assert_eq!(
            gw.admit(&request("/x", None)).await.unwrap_err(),
            Rejection::NoHealthyInstance {
                endpoint: "GET v1 /x".into()
            }
        );
    }

    #[tokio::test]
    async fn test_client_errors_do_not_count() {
        let gw = gateway(vec![endpoint("/x")]);
        for _ in 0..5 {
            let admission = gw.admit(&request("/x", None)).await.unwrap();
            gw.report(&admission, Outcome::Status(StatusCode::NOT_FOUND)).await;
        }
        let state = gw.breaker().get_state("http://127.0.0.1:9").await;
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);
    }
}
