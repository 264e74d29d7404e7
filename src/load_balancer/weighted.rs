//! Weighted round-robin load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{
    instance::ServiceInstance, round_robin::RouteCounters, SelectionStrategy,
};

/// Cumulative-weight selector.
///
/// Advances the route counter, maps it to `target = counter mod total + 1`
/// and walks the instances until the running weight reaches the target.
/// Over `total_weight` consecutive calls each instance is picked exactly
/// `weight` times.
#[derive(Debug)]
pub struct WeightedRoundRobin {
    counters: Arc<RouteCounters>,
}

impl WeightedRoundRobin {
    pub fn new(counters: Arc<RouteCounters>) -> Self {
        Self { counters }
    }
}

impl SelectionStrategy for WeightedRoundRobin {
    fn next_instance(
        &self,
        route: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }
        let counter = self.counters.next(route) as u64;
        let total: u64 = instances.iter().map(|i| i.weight as u64).sum();
        if total == 0 {
            // All weights zero: plain rotation.
            return Some(instances[(counter % instances.len() as u64) as usize].clone());
        }

        let target = counter % total + 1;
        let mut running = 0u64;
        for instance in instances {
            running += instance.weight as u64;
            if running >= target {
                return Some(instance.clone());
            }
        }
        instances.last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::load_balancer::test_instances;

    #[test]
    fn test_one_one_two() {
        let lb = WeightedRoundRobin::new(Arc::new(RouteCounters::new()));
        let backends = test_instances(&[1, 1, 2]);

        let picks: Vec<String> = (0..4)
            .map(|_| lb.next_instance("r", &backends).unwrap().id.clone())
            .collect();
        assert_eq!(picks.iter().filter(|id| **id == backends[2].id).count(), 2);
        assert_eq!(picks.iter().filter(|id| **id == backends[0].id).count(), 1);
        assert_eq!(picks.iter().filter(|id| **id == backends[1].id).count(), 1);
    }

    #[test]
    fn test_full_cycle_matches_weights() {
        let lb = WeightedRoundRobin::new(Arc::new(RouteCounters::new()));
        let weights = [3, 1, 5, 2];
        let backends = test_instances(&weights);
        let total: u32 = weights.iter().sum();

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..total * 2 {
            let s = lb.next_instance("r", &backends).unwrap();
            *counts.entry(s.id.clone()).or_default() += 1;
        }
        for (b, w) in backends.iter().zip(weights) {
            assert_eq!(counts[&b.id], w * 2);
        }
    }

    #[test]
    fn test_zero_weights_rotate() {
        let lb = WeightedRoundRobin::new(Arc::new(RouteCounters::new()));
        let backends = test_instances(&[0, 0]);
        assert_eq!(lb.next_instance("r", &backends).unwrap().id, backends[0].id);
        assert_eq!(lb.next_instance("r", &backends).unwrap().id, backends[1].id);
    }

    #[test]
    fn test_zero_weight_instance_skipped() {
        let lb = WeightedRoundRobin::new(Arc::new(RouteCounters::new()));
        let backends = test_instances(&[0, 1]);
        for _ in 0..3 {
            assert_eq!(lb.next_instance("r", &backends).unwrap().id, backends[1].id);
        }
    }
}
