//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! (path, method, version)
//!     → routing (resolve Endpoint)
//!     → registry.rs (current instance set of the endpoint)
//!     → Filter candidates: healthy and circuit not OPEN
//!     → Apply the endpoint's strategy:
//!         - round_robin.rs (rotate; also health-based)
//!         - weighted.rs (cumulative weight scan)
//!         - least_conn.rs (fewest connections)
//!         - random.rs (uniform)
//!     → Return Selection or RouteError
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from shared per-route counters
//! - The caller counts connections (`ServiceInstance::acquire`), not the balancer
//! - No eligible instance is an explicit error, never a fallback to a bad backend
//! - Instance set changes start and stop health checks in the same call

pub mod balancer;
pub mod instance;
pub mod least_conn;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::sync::Arc;
use thiserror::Error;

pub use balancer::{EndpointSnapshot, LoadBalancer, Selection};
pub use instance::{ConnectionGuard, HealthState, InvalidEndpointConfig, ServiceInstance};
pub use registry::{InstanceRegistry, RegistryError};

/// Backend selection algorithm.
pub trait SelectionStrategy: Send + Sync + std::fmt::Debug {
    /// Pick one of `instances` for `route`. `None` only if the slice is empty.
    fn next_instance(
        &self,
        route: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>>;
}

/// Routing failures surfaced to the request path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no endpoint for {method} {version} {path}")]
    EndpointNotFound {
        method: String,
        version: String,
        path: String,
    },

    #[error("no healthy instance for endpoint {endpoint}")]
    NoHealthyInstance { endpoint: String },
}

#[cfg(test)]
pub(crate) fn test_instances(weights: &[u32]) -> Vec<Arc<ServiceInstance>> {
    use crate::config::schema::InstanceConfig;

    weights
        .iter()
        .enumerate()
        .map(|(i, weight)| {
            Arc::new(
                ServiceInstance::from_config(&InstanceConfig {
                    id: format!("i{}", i),
                    url: format!("http://127.0.0.1:{}", 10_000 + i),
                    weight: *weight,
                    is_healthy: None,
                })
                .unwrap(),
            )
        })
        .collect()
}
