//! Backend instance abstraction.
//!
//! # Responsibilities
//! - Represent a single backend instance behind an endpoint
//! - Track active connections (for Least Connections)
//! - Track health state written by the health monitor
//! - Parse endpoint targets into instances

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::schema::{InstanceConfig, Target};

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
    /// Answering, but slowly. Still routable.
    Degraded = 3,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            3 => HealthState::Degraded,
            _ => HealthState::Unknown,
        }
    }
}

/// A malformed endpoint target.
#[derive(Debug, Error)]
pub enum InvalidEndpointConfig {
    #[error("target is not a valid instance list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("instance {id} has invalid url {url:?}: {source}")]
    Url {
        id: String,
        url: String,
        source: url::ParseError,
    },

    #[error("instance url {0:?} must use http")]
    Scheme(String),

    #[error("duplicate instance id {0}")]
    DuplicateId(String),

    #[error("instance id must not be empty")]
    EmptyId,
}

/// A single backend instance.
#[derive(Debug)]
pub struct ServiceInstance {
    /// Identity used for health checks and circuit breaking.
    pub id: String,
    /// Base URL requests are forwarded to.
    pub url: Url,
    pub weight: u32,

    state: AtomicU8,
    /// Millis since the Unix epoch of the last probe, 0 if never probed.
    last_health_check: AtomicU64,
    /// Process-local; never persisted.
    connections: AtomicUsize,
}

impl ServiceInstance {
    /// Build an instance from its configuration.
    pub fn from_config(config: &InstanceConfig) -> Result<Self, InvalidEndpointConfig> {
        if config.id.trim().is_empty() {
            return Err(InvalidEndpointConfig::EmptyId);
        }
        let url = Url::parse(config.url.trim()).map_err(|source| InvalidEndpointConfig::Url {
            id: config.id.clone(),
            url: config.url.clone(),
            source,
        })?;
        if url.scheme() != "http" {
            return Err(InvalidEndpointConfig::Scheme(config.url.clone()));
        }
        let state = match config.is_healthy {
            Some(true) => HealthState::Healthy,
            Some(false) => HealthState::Unhealthy,
            None => HealthState::Unknown,
        };
        Ok(Self {
            id: config.id.clone(),
            url,
            weight: config.weight,
            state: AtomicU8::new(state as u8),
            last_health_check: AtomicU64::new(0),
            connections: AtomicUsize::new(0),
        })
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    /// Same backend as described by `other` (id, url and weight).
    pub fn same_backend(&self, other: &ServiceInstance) -> bool {
        self.id == other.id && self.url == other.url && self.weight == other.weight
    }

    // --- Connections ---

    /// Get the current number of active connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count, never below zero.
    pub fn dec_connections(&self) {
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1));
    }

    /// Carry a connection count over from a replaced instance.
    pub(crate) fn with_connections(self, count: usize) -> Self {
        self.connections.store(count, Ordering::Relaxed);
        self
    }

    /// Count a dispatched request; the count drops when the guard does.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        self.inc_connections();
        ConnectionGuard {
            instance: self.clone(),
        }
    }

    // --- Health ---

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// True unless the instance has been marked unhealthy.
    pub fn is_healthy(&self) -> bool {
        self.health_state() != HealthState::Unhealthy
    }

    /// Record a health check result taken at `at_ms`.
    pub fn set_health(&self, state: HealthState, at_ms: u64) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.last_health_check.store(at_ms, Ordering::Relaxed);
    }

    pub fn last_health_check(&self) -> Option<u64> {
        match self.last_health_check.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            url: self.base_url().to_string(),
            weight: self.weight,
            is_healthy: self.is_healthy(),
            health: self.health_state(),
            last_health_check: self.last_health_check(),
            connections: self.connections(),
        }
    }
}

/// Point-in-time view of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: String,
    pub url: String,
    pub weight: u32,
    pub is_healthy: bool,
    pub health: HealthState,
    pub last_health_check: Option<u64>,
    pub connections: usize,
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    instance: Arc<ServiceInstance>,
}

impl ConnectionGuard {
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }
}

impl Deref for ConnectionGuard {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.instance.dec_connections();
    }
}

/// Parse an endpoint target into instances.
///
/// A bare URL yields one healthy instance of weight 1 whose id is the URL.
/// A raw string starting with `[` is read as a JSON instance array.
pub fn parse_target(target: &Target) -> Result<Vec<ServiceInstance>, InvalidEndpointConfig> {
    let configs = match target {
        Target::Instances(list) => list.clone(),
        Target::Raw(raw) => {
            let raw = raw.trim();
            if raw.starts_with('[') {
                serde_json::from_str::<Vec<InstanceConfig>>(raw)?
            } else {
                vec![InstanceConfig {
                    id: raw.to_string(),
                    url: raw.to_string(),
                    weight: 1,
                    is_healthy: Some(true),
                }]
            }
        }
    };

    let mut seen = HashSet::new();
    let mut instances = Vec::with_capacity(configs.len());
    for config in &configs {
        if !seen.insert(config.id.as_str()) {
            return Err(InvalidEndpointConfig::DuplicateId(config.id.clone()));
        }
        instances.push(ServiceInstance::from_config(config)?);
    }
    Ok(instances)
}
