//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, windows > 0)
//! - Detect duplicate endpoints and instance ids bound to two backends
//! - Require an admin key when the admin API is enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Malformed endpoint targets are NOT errors: they are logged at load and
//!   leave the endpoint with zero instances
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, GatewayConfig, RateLimitPolicy};
use crate::load_balancer::instance::parse_target;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.store.command_timeout_ms == 0 {
        errors.push(ValidationError::new("store.command_timeout_ms", "must be > 0"));
    }

    check_rate_limit("rate_limit", &config.rate_limit.default_policy, &mut errors);
    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);

    let hc = &config.health_check;
    if hc.interval_ms == 0 {
        errors.push(ValidationError::new("health_check.interval_ms", "must be > 0"));
    }
    if hc.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be > 0"));
    }
    if !hc.path.starts_with('/') {
        errors.push(ValidationError::new("health_check.path", "must start with '/'"));
    }
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be > 0"));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new(
            "admin.api_key",
            "must not be empty when the admin API is enabled",
        ));
    }

    let mut seen = HashSet::new();
    let mut backends: HashMap<String, (String, u32)> = HashMap::new();
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let prefix = format!("endpoints[{}]", i);
        if !endpoint.path.starts_with('/') {
            errors.push(ValidationError::new(format!("{}.path", prefix), "must start with '/'"));
        }
        if !METHODS.contains(&endpoint.method.to_ascii_uppercase().as_str()) {
            errors.push(ValidationError::new(
                format!("{}.method", prefix),
                format!("unsupported method {}", endpoint.method),
            ));
        }
        if endpoint.version.is_empty() {
            errors.push(ValidationError::new(format!("{}.version", prefix), "must not be empty"));
        }
        if !seen.insert(endpoint.id()) {
            errors.push(ValidationError::new(
                prefix.clone(),
                format!("duplicate endpoint {}", endpoint.id()),
            ));
        }
        if let Some(policy) = &endpoint.rate_limit {
            check_rate_limit(&format!("{}.rate_limit", prefix), policy, &mut errors);
        }
        if let Some(breaker) = &endpoint.circuit_breaker {
            check_breaker(&format!("{}.circuit_breaker", prefix), breaker, &mut errors);
        }
        if endpoint.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("{}.timeout_ms", prefix), "must be > 0"));
        }
        for instance in parse_target(&endpoint.target).unwrap_or_default() {
            let backend = (instance.base_url().to_string(), instance.weight);
            match backends.get(&instance.id) {
                Some(first) if *first != backend => errors.push(ValidationError::new(
                    format!("{}.target", prefix),
                    format!(
                        "instance {} is {} here but {} in an earlier endpoint",
                        instance.id, backend.0, first.0
                    ),
                )),
                Some(_) => {}
                None => {
                    backends.insert(instance.id.clone(), backend);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rate_limit(field: &str, policy: &RateLimitPolicy, errors: &mut Vec<ValidationError>) {
    if policy.window_ms == 0 {
        errors.push(ValidationError::new(format!("{}.window_ms", field), "must be > 0"));
    }
    if policy.max_requests == 0 {
        errors.push(ValidationError::new(format!("{}.max_requests", field), "must be > 0"));
    }
}

fn check_breaker(field: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.failure_threshold", field), "must be > 0"));
    }
    if config.success_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.success_threshold", field), "must be > 0"));
    }
    if config.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be > 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{EndpointConfig, Target};

    fn endpoint(path: &str, method: &str) -> EndpointConfig {
        EndpointConfig {
            path: path.into(),
            method: method.into(),
            version: "v1".into(),
            target: Target::Raw("http://127.0.0.1:1".into()),
            rate_limit: None,
            circuit_breaker: None,
            strategy: None,
            timeout_ms: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "nope".into();
        config.endpoints.push(endpoint("users", "FETCH"));
        config.endpoints.push(endpoint("/a", "GET"));
        config.endpoints.push(endpoint("/a", "get"));

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"endpoints[0].path"));
        assert!(fields.contains(&"endpoints[0].method"));
        assert!(fields.contains(&"endpoints[2]"));
    }

    #[test]
    fn test_instance_id_bound_to_two_backends() {
        let mut config = GatewayConfig::default();
        let mut one = endpoint("/one", "GET");
        one.target = Target::Raw(r#"[{"id": "a", "url": "http://127.0.0.1:9"}]"#.into());
        let mut two = endpoint("/two", "GET");
        two.target = Target::Raw(r#"[{"id": "a", "url": "http://127.0.0.1:10"}]"#.into());
        let mut three = endpoint("/three", "GET");
        three.target = Target::Raw(r#"[{"id": "a", "url": "http://127.0.0.1:9"}]"#.into());
        config.endpoints = vec![one, two, three];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "endpoints[1].target");
    }

    #[test]
    fn test_enabled_admin_requires_key() {
        let mut config = GatewayConfig::default();
        config.admin.enabled = true;
        config.admin.api_key = "  ".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");

        config.admin.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_malformed_target_is_not_an_error() {
        let mut config = GatewayConfig::default();
        let mut e = endpoint("/x", "GET");
        e.target = Target::Raw("[not json".into());
        config.endpoints.push(e);
        assert!(validate_config(&config).is_ok());
    }
}
