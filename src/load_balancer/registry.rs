//! Instance registry.
//!
//! # Responsibilities
//! - Hold the instance set of every endpoint, keyed by endpoint id
//! - Replace instance sets while keeping live instances (health, connections)
//! - Add and remove single instances
//! - Report which instances appeared or disappeared on every change

use std::collections::HashSet;
use std::sync::Arc;
use dashmap::DashMap;
use thiserror::Error;

use crate::load_balancer::instance::{InvalidEndpointConfig, ServiceInstance};

type InstanceSet = Arc<Vec<Arc<ServiceInstance>>>;

/// Errors from single-instance mutations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("endpoint {0} is not registered")]
    UnknownEndpoint(String),

    #[error("endpoint {endpoint} already has an instance {instance}")]
    DuplicateInstance { endpoint: String, instance: String },

    #[error("endpoint {endpoint} has no instance {instance}")]
    UnknownInstance { endpoint: String, instance: String },

    #[error("instance {instance} is already registered as {existing}")]
    ConflictingInstance { instance: String, existing: String },

    #[error(transparent)]
    InvalidInstance(#[from] InvalidEndpointConfig),
}

/// Instances that entered or left the registry in one change.
#[derive(Debug, Default)]
pub struct RegistryDiff {
    pub added: Vec<Arc<ServiceInstance>>,
    pub removed: Vec<Arc<ServiceInstance>>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Endpoint id → instance set.
///
/// Sets are immutable snapshots; readers clone the `Arc` and never block
/// writers. Writers must be serialized by the owner.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    sets: DashMap<String, InstanceSet>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current instances of an endpoint.
    pub fn instances(&self, endpoint_id: &str) -> Option<InstanceSet> {
        self.sets.get(endpoint_id).map(|set| set.clone())
    }

    pub fn contains(&self, endpoint_id: &str) -> bool {
        self.sets.contains_key(endpoint_id)
    }

    /// Replace the instance set of an endpoint.
    ///
    /// An incoming instance describing the same backend as a live one (same
    /// id, url and weight) keeps the live one. Otherwise the connection
    /// count of the instance it replaces in this endpoint is carried over.
    ///
    /// Ids must describe one backend across endpoints; callers filter the
    /// whole endpoint set with [`InstanceRegistry::conflict`] first.
    pub fn load(&self, endpoint_id: &str, incoming: Vec<ServiceInstance>) -> RegistryDiff {
        let previous = self.instances(endpoint_id).unwrap_or_default();
        let mut reused = Vec::new();
        let merged: Vec<Arc<ServiceInstance>> = incoming
            .into_iter()
            .map(|fresh| match self.find_same_backend(&fresh) {
                Some(live) => {
                    reused.push(live.clone());
                    live
                }
                None => match previous.iter().find(|old| old.id == fresh.id) {
                    Some(old) => Arc::new(fresh.with_connections(old.connections())),
                    None => Arc::new(fresh),
                },
            })
            .collect();

        let mut diff = diff_sets(&previous, &merged);
        // Already live under another endpoint
        diff.added.retain(|i| !reused.iter().any(|r| Arc::ptr_eq(r, i)));
        self.sets.insert(endpoint_id.to_string(), Arc::new(merged));
        self.retain_live(diff)
    }

    /// Append one instance to an endpoint.
    pub fn add(
        &self,
        endpoint_id: &str,
        instance: ServiceInstance,
    ) -> Result<Arc<ServiceInstance>, RegistryError> {
        let current = self
            .instances(endpoint_id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(endpoint_id.to_string()))?;
        if current.iter().any(|i| i.id == instance.id) {
            return Err(RegistryError::DuplicateInstance {
                endpoint: endpoint_id.to_string(),
                instance: instance.id,
            });
        }

        if let Some(err) = self.conflict(&instance) {
            return Err(err);
        }

        let added = match self.find_same_backend(&instance) {
            Some(live) => live,
            None => Arc::new(instance),
        };
        let mut next = current.as_ref().clone();
        next.push(added.clone());
        self.sets.insert(endpoint_id.to_string(), Arc::new(next));
        Ok(added)
    }

    /// Detach one instance from an endpoint.
    pub fn remove(
        &self,
        endpoint_id: &str,
        instance_id: &str,
    ) -> Result<Arc<ServiceInstance>, RegistryError> {
        let current = self
            .instances(endpoint_id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(endpoint_id.to_string()))?;
        let position = current
            .iter()
            .position(|i| i.id == instance_id)
            .ok_or_else(|| RegistryError::UnknownInstance {
                endpoint: endpoint_id.to_string(),
                instance: instance_id.to_string(),
            })?;

        let mut next = current.as_ref().clone();
        let removed = next.remove(position);
        self.sets.insert(endpoint_id.to_string(), Arc::new(next));
        Ok(removed)
    }

    /// Forget an endpoint entirely.
    pub fn drop_endpoint(&self, endpoint_id: &str) -> RegistryDiff {
        let Some((_, previous)) = self.sets.remove(endpoint_id) else {
            return RegistryDiff::default();
        };
        let diff = RegistryDiff {
            added: Vec::new(),
            removed: previous.as_ref().clone(),
        };
        self.retain_live(diff)
    }

    /// Any attached instance with this id.
    pub fn find_live(&self, instance_id: &str) -> Option<Arc<ServiceInstance>> {
        self.sets
            .iter()
            .find_map(|set| set.iter().find(|i| i.id == instance_id).cloned())
    }

    /// An attached instance describing exactly this backend.
    fn find_same_backend(&self, instance: &ServiceInstance) -> Option<Arc<ServiceInstance>> {
        self.sets.iter().find_map(|set| {
            set.iter()
                .find(|live| live.same_backend(instance))
                .cloned()
        })
    }

    /// Error if the id is attached with a different url or weight.
    pub fn conflict(&self, instance: &ServiceInstance) -> Option<RegistryError> {
        self.sets.iter().find_map(|set| {
            set.iter()
                .find(|live| live.id == instance.id && !live.same_backend(instance))
                .map(|live| RegistryError::ConflictingInstance {
                    instance: instance.id.clone(),
                    existing: describe(live),
                })
        })
    }

    /// Every distinct attached instance.
    pub fn all(&self) -> Vec<Arc<ServiceInstance>> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for set in self.sets.iter() {
            for instance in set.iter() {
                if seen.insert(Arc::as_ptr(instance)) {
                    all.push(instance.clone());
                }
            }
        }
        all
    }

    pub fn endpoint_ids(&self) -> Vec<String> {
        self.sets.iter().map(|e| e.key().clone()).collect()
    }

    fn is_live(&self, instance: &Arc<ServiceInstance>) -> bool {
        self.sets
            .iter()
            .any(|set| set.iter().any(|i| Arc::ptr_eq(i, instance)))
    }

    /// Drop removals that are still attached elsewhere.
    fn retain_live(&self, mut diff: RegistryDiff) -> RegistryDiff {
        diff.removed.retain(|i| !self.is_live(i));
        diff
    }
}

fn describe(instance: &ServiceInstance) -> String {
    format!("{} (weight {})", instance.base_url(), instance.weight)
}

fn diff_sets(before: &[Arc<ServiceInstance>], after: &[Arc<ServiceInstance>]) -> RegistryDiff {
    let contains = |set: &[Arc<ServiceInstance>], i: &Arc<ServiceInstance>| {
        set.iter().any(|o| Arc::ptr_eq(o, i))
    };
    RegistryDiff {
        added: after.iter().filter(|i| !contains(before, i)).cloned().collect(),
        removed: before.iter().filter(|i| !contains(after, i)).cloned().collect(),
    }
}
