//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use dashmap::DashMap;

use crate::load_balancer::{instance::ServiceInstance, SelectionStrategy};

/// Per-route monotonic counters, shared by the rotating strategies.
///
/// Process-local: fairness is best effort across gateway processes.
#[derive(Debug, Default)]
pub struct RouteCounters {
    counters: DashMap<String, AtomicUsize>,
}

impl RouteCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the route's counter and advance it.
    pub fn next(&self, route: &str) -> usize {
        if let Some(counter) = self.counters.get(route) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .entry(route.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }
}

/// Round-robin selector.
/// The `i`-th call on a route picks `instances[i mod N]`.
#[derive(Debug)]
pub struct RoundRobin {
    counters: Arc<RouteCounters>,
}

impl RoundRobin {
    pub fn new(counters: Arc<RouteCounters>) -> Self {
        Self { counters }
    }
}

impl SelectionStrategy for RoundRobin {
    fn next_instance(
        &self,
        route: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }
        let index = self.counters.next(route) % instances.len();
        Some(instances[index].clone())
    }
}

/// Health-based selection: round robin over the health-filtered set.
#[derive(Debug)]
pub struct HealthBased(RoundRobin);

impl HealthBased {
    pub fn new(counters: Arc<RouteCounters>) -> Self {
        Self(RoundRobin::new(counters))
    }
}

impl SelectionStrategy for HealthBased {
    fn next_instance(
        &self,
        route: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        self.0.next_instance(route, instances)
    }
}
