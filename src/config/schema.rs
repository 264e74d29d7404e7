//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Shared state store connection.
    pub store: StoreConfig,

    /// Default rate limiting policy.
    pub rate_limit: RateLimitConfig,

    /// Default circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Load balancing defaults.
    pub load_balancer: LoadBalancerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Endpoint definitions.
    pub endpoints: Vec<EndpointConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// API version used when the request carries none.
    pub default_version: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            default_version: "v1".to_string(),
        }
    }
}

/// Which state store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Shared state store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Connection URL for networked stores.
    pub url: String,

    /// Per-command deadline in milliseconds.
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            command_timeout_ms: 250,
        }
    }
}

/// Which caller identity a rate limit counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    ApiKey,
    User,
    #[default]
    Ip,
    Endpoint,
}

/// A fixed-window rate limit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per window.
    pub max_requests: u64,

    pub scope: RateLimitScope,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
            scope: RateLimitScope::Ip,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Apply the default policy to endpoints without their own.
    pub enabled: bool,

    /// Policy used by endpoints that do not declare one.
    #[serde(flatten)]
    pub default_policy: RateLimitPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_policy: RateLimitPolicy::default(),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures in CLOSED before opening the circuit.
    pub failure_threshold: u32,

    /// Successes in HALF_OPEN before closing the circuit.
    pub success_threshold: u32,

    /// How long the circuit stays OPEN before a trial call, in milliseconds.
    pub timeout_ms: u64,

    /// Failures further apart than this restart the CLOSED failure count.
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            monitoring_period_ms: 120_000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Successful probes slower than this are classified as degraded.
    pub degraded_threshold_ms: u64,

    /// Path appended to the instance base URL.
    pub path: String,

    /// Number of health records kept in memory.
    pub history_capacity: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            degraded_threshold_ms: 2_000,
            path: "/health".to_string(),
            history_capacity: 1_000,
        }
    }
}

/// Backend selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Random,
    HealthBased,
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Strategy for endpoints that do not override it.
    pub strategy: BalanceStrategy,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default upstream request timeout in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_ms: 30_000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// A backend instance as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub id: String,

    pub url: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Initial health; absent means healthy until probed.
    #[serde(default, alias = "is_healthy")]
    pub is_healthy: Option<bool>,
}

fn default_weight() -> u32 {
    1
}

/// Where an endpoint forwards to.
///
/// `Raw` holds either a bare URL or the text of a JSON instance array.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Target {
    Raw(String),
    Instances(Vec<InstanceConfig>),
}

/// Endpoint configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Path pattern; `:name` matches one segment, `*` any suffix.
    pub path: String,

    /// HTTP method (upper case).
    pub method: String,

    /// API version (e.g., "v1").
    pub version: String,

    pub target: Target,

    /// Overrides the default rate limit.
    #[serde(default)]
    pub rate_limit: Option<RateLimitPolicy>,

    /// Overrides the default circuit breaker thresholds.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Overrides the default balancing strategy.
    #[serde(default)]
    pub strategy: Option<BalanceStrategy>,

    /// Upstream timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl EndpointConfig {
    /// Stable identifier: `METHOD version path`.
    pub fn id(&self) -> String {
        endpoint_id(&self.method, &self.version, &self.path)
    }
}

pub fn endpoint_id(method: &str, version: &str, path: &str) -> String {
    format!("{} {} {}", method.to_ascii_uppercase(), version, path)
}
