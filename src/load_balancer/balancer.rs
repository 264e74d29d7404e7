//! Endpoint-aware load balancer.
//!
//! # Responsibilities
//! - Own the endpoint router and the instance registry
//! - Filter candidates through health state and circuit breakers
//! - Dispatch to the endpoint's selection strategy
//! - Keep health checks in step with instance set changes

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use arc_swap::ArcSwap;
use futures_util::future::join_all;
use serde::Serialize;

use crate::config::schema::{BalanceStrategy, CircuitBreakerConfig, EndpointConfig, InstanceConfig};
use crate::health::HealthMonitor;
use crate::load_balancer::{
    instance::{parse_target, InstanceSnapshot, ServiceInstance},
    least_conn::LeastConnections,
    random::RandomPick,
    registry::{InstanceRegistry, RegistryError},
    round_robin::{HealthBased, RoundRobin, RouteCounters},
    weighted::WeightedRoundRobin,
    RouteError, SelectionStrategy,
};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::routing::{Endpoint, EndpointDefaults, EndpointRouter};

/// The endpoint and instance chosen for one request.
#[derive(Debug, Clone)]
pub struct Selection {
    pub endpoint: Arc<Endpoint>,
    pub instance: Arc<ServiceInstance>,
}

/// Point-in-time view of an endpoint and its instances.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSnapshot {
    pub id: String,
    pub path: String,
    pub method: String,
    pub version: String,
    pub strategy: BalanceStrategy,
    pub instances: Vec<InstanceSnapshot>,
}

#[derive(Debug)]
struct Strategies {
    round_robin: RoundRobin,
    weighted: WeightedRoundRobin,
    least_connections: LeastConnections,
    random: RandomPick,
    health_based: HealthBased,
}

impl Strategies {
    fn new() -> Self {
        let counters = Arc::new(RouteCounters::new());
        Self {
            round_robin: RoundRobin::new(counters.clone()),
            weighted: WeightedRoundRobin::new(counters.clone()),
            least_connections: LeastConnections::new(),
            random: RandomPick,
            health_based: HealthBased::new(counters),
        }
    }

    fn get(&self, strategy: BalanceStrategy) -> &dyn SelectionStrategy {
        match strategy {
            BalanceStrategy::RoundRobin => &self.round_robin,
            BalanceStrategy::WeightedRoundRobin => &self.weighted,
            BalanceStrategy::LeastConnections => &self.least_connections,
            BalanceStrategy::Random => &self.random,
            BalanceStrategy::HealthBased => &self.health_based,
        }
    }
}

/// Resolves routes to concrete instances.
///
/// The request path is lock-free: the router is swapped atomically and the
/// registry hands out immutable instance sets. Mutations are serialized by
/// `mutation` so that registry changes and health check start/stop stay
/// paired.
#[derive(Debug)]
pub struct LoadBalancer {
    router: ArcSwap<EndpointRouter>,
    registry: InstanceRegistry,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<HealthMonitor>,
    defaults: EndpointDefaults,
    strategies: Strategies,
    mutation: Mutex<()>,
}

impl LoadBalancer {
    pub fn new(
        defaults: EndpointDefaults,
        breaker: Arc<CircuitBreaker>,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            router: ArcSwap::from_pointee(EndpointRouter::default()),
            registry: InstanceRegistry::new(),
            breaker,
            monitor,
            defaults,
            strategies: Strategies::new(),
            mutation: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.mutation.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the endpoint set.
    ///
    /// Instances that stay keep their health and connection counts. Health
    /// checks stop for instances that left and start for those that joined.
    /// A malformed target is logged and yields zero instances. An instance
    /// id describes one backend: a later declaration of the id with another
    /// url or weight is logged and skipped.
    pub fn sync_endpoints(&self, configs: &[EndpointConfig]) {
        let _guard = self.lock();
        let router = EndpointRouter::new(configs, &self.defaults);

        let mut declared = HashMap::new();
        let mut seen = HashSet::new();
        let mut added: Vec<(Arc<ServiceInstance>, CircuitBreakerConfig)> = Vec::new();
        let mut removed = Vec::new();

        for config in configs {
            let id = config.id();
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(endpoint) = router.get(&id) else { continue };

            let instances = match parse_target(&config.target) {
                Ok(instances) => instances,
                Err(e) => {
                    tracing::warn!(endpoint = %id, error = %e, "Invalid endpoint target, no instances");
                    Vec::new()
                }
            };
            let instances = keep_consistent(&mut declared, &id, instances);
            let diff = self.registry.load(&id, instances);
            added.extend(
                diff.added
                    .into_iter()
                    .map(|i| (i, endpoint.circuit_breaker.clone())),
            );
            removed.extend(diff.removed);
        }

        for id in self.registry.endpoint_ids() {
            if !seen.contains(&id) {
                removed.extend(self.registry.drop_endpoint(&id).removed);
            }
        }

        tracing::info!(
            endpoints = router.len(),
            added = added.len(),
            removed = removed.len(),
            "Endpoints synchronized"
        );
        self.router.store(Arc::new(router));

        for instance in removed {
            if self.registry.find_live(&instance.id).is_none() {
                self.monitor.stop_health_check(&instance.id);
            }
        }
        for (instance, breaker_config) in added {
            self.monitor.start_health_check(instance, breaker_config);
        }
    }

    /// Find the endpoint for a request.
    pub fn resolve(&self, path: &str, method: &str, version: &str) -> Option<Arc<Endpoint>> {
        self.router.load().resolve(path, method, version)
    }

    pub fn endpoint(&self, endpoint_id: &str) -> Option<Arc<Endpoint>> {
        self.router.load().get(endpoint_id)
    }

    /// Instances of `endpoint` that may receive traffic now.
    ///
    /// Breaker checks run concurrently and may move timed-out circuits from
    /// OPEN to HALF_OPEN.
    pub async fn eligible_instances(&self, endpoint: &Endpoint) -> Vec<Arc<ServiceInstance>> {
        let instances = self.registry.instances(&endpoint.id).unwrap_or_default();
        let checks = instances.iter().filter(|i| i.is_healthy()).map(|instance| async move {
            let allowed = self
                .breaker
                .check_circuit_breaker(&instance.id, &endpoint.circuit_breaker)
                .await;
            allowed.then(|| instance.clone())
        });
        join_all(checks).await.into_iter().flatten().collect()
    }

    /// Resolve a request to one instance.
    pub async fn select(
        &self,
        path: &str,
        method: &str,
        version: &str,
    ) -> Result<Selection, RouteError> {
        let endpoint = self
            .resolve(path, method, version)
            .ok_or_else(|| RouteError::EndpointNotFound {
                method: method.to_ascii_uppercase(),
                version: version.to_string(),
                path: path.to_string(),
            })?;
        self.select_for(endpoint).await
    }

    /// Pick an instance of an already resolved endpoint.
    pub async fn select_for(&self, endpoint: Arc<Endpoint>) -> Result<Selection, RouteError> {
        let eligible = self.eligible_instances(&endpoint).await;
        let strategy = self.strategies.get(endpoint.strategy);

        match strategy.next_instance(&endpoint.id, &eligible) {
            Some(instance) => Ok(Selection { endpoint, instance }),
            None => {
                tracing::warn!(
                    endpoint = %endpoint.id,
                    instances = self.registry.instances(&endpoint.id).map_or(0, |s| s.len()),
                    "No healthy instance available"
                );
                Err(RouteError::NoHealthyInstance {
                    endpoint: endpoint.id.clone(),
                })
            }
        }
    }

    /// Attach an instance to an endpoint and start probing it.
    pub fn add_instance(
        &self,
        endpoint_id: &str,
        config: &InstanceConfig,
    ) -> Result<Arc<ServiceInstance>, RegistryError> {
        let _guard = self.lock();
        let endpoint = self
            .endpoint(endpoint_id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(endpoint_id.to_string()))?;
        let instance = ServiceInstance::from_config(config)?;
        let added = self.registry.add(endpoint_id, instance)?;

        if !self.monitor.is_monitoring(&added) {
            self.monitor
                .start_health_check(added.clone(), endpoint.circuit_breaker.clone());
        }
        tracing::info!(endpoint = %endpoint_id, instance = %added.id, url = %added.base_url(), "Instance added");
        Ok(added)
    }

    /// Detach an instance from an endpoint and stop probing it unless it
    /// still serves another endpoint.
    pub fn remove_instance(
        &self,
        endpoint_id: &str,
        instance_id: &str,
    ) -> Result<Arc<ServiceInstance>, RegistryError> {
        let _guard = self.lock();
        let removed = self.registry.remove(endpoint_id, instance_id)?;
        if self.registry.find_live(instance_id).is_none() {
            self.monitor.stop_health_check(instance_id);
        }
        tracing::info!(endpoint = %endpoint_id, instance = %instance_id, "Instance removed");
        Ok(removed)
    }

    /// Instances currently attached to an endpoint.
    pub fn instances(&self, endpoint_id: &str) -> Vec<Arc<ServiceInstance>> {
        self.registry
            .instances(endpoint_id)
            .map(|set| set.as_ref().clone())
            .unwrap_or_default()
    }

    /// Every distinct attached instance.
    pub fn all_instances(&self) -> Vec<Arc<ServiceInstance>> {
        self.registry.all()
    }

    /// Endpoints in registration order with their instances.
    pub fn endpoints(&self) -> Vec<EndpointSnapshot> {
        self.router
            .load()
            .endpoints()
            .iter()
            .map(|e| EndpointSnapshot {
                id: e.id.clone(),
                path: e.path.clone(),
                method: e.method.clone(),
                version: e.version.clone(),
                strategy: e.strategy,
                instances: self.instances(&e.id).iter().map(|i| i.snapshot()).collect(),
            })
            .collect()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Stop all background work.
    pub fn shutdown(&self) {
        self.monitor.stop_all();
    }
}

/// Drop instances whose id was first declared with another url or weight.
fn keep_consistent(
    declared: &mut HashMap<String, (String, u32)>,
    endpoint_id: &str,
    instances: Vec<ServiceInstance>,
) -> Vec<ServiceInstance> {
    instances
        .into_iter()
        .filter(|instance| {
            let backend = (instance.base_url().to_string(), instance.weight);
            match declared.entry(instance.id.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(backend);
                    true
                }
                Entry::Occupied(first) if *first.get() == backend => true,
                Entry::Occupied(first) => {
                    tracing::warn!(
                        endpoint = %endpoint_id,
                        instance = %instance.id,
                        url = %instance.base_url(),
                        bound_to = %first.get().0,
                        "Instance id already bound to another backend, skipped"
                    );
                    false
                }
            }
        })
        .collect()
}
