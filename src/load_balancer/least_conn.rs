//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{instance::ServiceInstance, SelectionStrategy};

/// Least connections selector.
/// Selects the instance with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for LeastConnections {
    fn next_instance(
        &self,
        _route: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        // min_by_key keeps the first of equal minimums, so ties go to list order
        instances.iter().min_by_key(|i| i.connections()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_instances;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let backends = test_instances(&[1, 1]);
        let (b1, b2) = (backends[0].clone(), backends[1].clone());

        // artificially increase connections on b1
        b1.inc_connections();

        // Should pick b2 (0 connections)
        assert_eq!(lb.next_instance("r", &backends).unwrap().id, b2.id);

        // now b2 has 2, b1 has 1
        b2.inc_connections();
        b2.inc_connections();
        assert_eq!(lb.next_instance("r", &backends).unwrap().id, b1.id);
    }

    #[test]
    fn test_tie_goes_to_first() {
        let lb = LeastConnections::new();
        let backends = test_instances(&[1, 1, 1]);
        backends[0].inc_connections();
        assert_eq!(lb.next_instance("r", &backends).unwrap().id, backends[1].id);
    }
}
