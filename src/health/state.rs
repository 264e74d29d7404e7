//! Instance health classification.
//!
//! # States
//! - Healthy: 2xx within the latency threshold
//! - Degraded: 2xx, but slower than the threshold; still receives traffic
//! - Unhealthy: non-2xx, timeout or connection error; excluded from load balancing
//!
//! # Design Decisions
//! - A single probe decides the state; flapping is damped by the circuit
//!   breaker, which every probe result feeds
//! - Degraded counts as a failure signal for the breaker

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::load_balancer::instance::HealthState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Whether the circuit breaker should count this as a success.
    pub fn is_success(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl From<HealthStatus> for HealthState {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => HealthState::Healthy,
            HealthStatus::Degraded => HealthState::Degraded,
            HealthStatus::Unhealthy => HealthState::Unhealthy,
        }
    }
}

/// Classify a completed probe response.
pub fn classify(status_is_success: bool, elapsed: Duration, degraded_threshold: Duration) -> HealthStatus {
    if !status_is_success {
        HealthStatus::Unhealthy
    } else if elapsed > degraded_threshold {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let threshold = Duration::from_millis(2_000);
        assert_eq!(classify(true, Duration::from_millis(10), threshold), HealthStatus::Healthy);
        assert_eq!(classify(true, Duration::from_millis(2_000), threshold), HealthStatus::Healthy);
        assert_eq!(classify(true, Duration::from_millis(2_001), threshold), HealthStatus::Degraded);
        assert_eq!(classify(false, Duration::from_millis(10), threshold), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_degraded_is_routable_failure() {
        let state: HealthState = HealthStatus::Degraded.into();
        assert_eq!(state, HealthState::Degraded);
        assert!(!HealthStatus::Degraded.is_success());
    }
}
