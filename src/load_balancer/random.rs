//! Uniform random load balancing strategy.

use std::sync::Arc;
use rand::Rng;

use crate::load_balancer::{instance::ServiceInstance, SelectionStrategy};

#[derive(Debug, Default)]
pub struct RandomPick;

impl SelectionStrategy for RandomPick {
    fn next_instance(
        &self,
        _route: &str,
        instances: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..instances.len());
        Some(instances[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use crate::load_balancer::test_instances;

    #[test]
    fn test_random_covers_all() {
        let backends = test_instances(&[1, 1, 1]);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            seen.insert(RandomPick.next_instance("r", &backends).unwrap().id.clone());
        }
        assert_eq!(seen.len(), 3);
        assert!(RandomPick.next_instance("r", &[]).is_none());
    }
}
