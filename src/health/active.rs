//! Active health checking.
//!
//! # Responsibilities
//! - Run one cancelable probe task per instance
//! - Probe `GET <instance>/health` with a bounded timeout
//! - Apply results: instance health, history, circuit breaker, metrics
//! - Discard results of probes whose task was stopped or replaced meanwhile

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use dashmap::DashMap;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::clock::now_millis;
use crate::config::schema::{CircuitBreakerConfig, HealthCheckConfig};
use crate::health::history::{HealthHistory, HealthRecord};
use crate::health::state::{classify, HealthStatus};
use crate::load_balancer::instance::ServiceInstance;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::timeouts::with_deadline;

/// Why a probe did not report healthy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("invalid probe request: {0}")]
    Request(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {0}")]
    Status(StatusCode),
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub elapsed: Duration,
    pub error: Option<ProbeError>,
}

#[derive(Debug)]
struct MonitorTask {
    instance: Arc<ServiceInstance>,
    breaker_config: CircuitBreakerConfig,
    generation: u64,
    stop: watch::Sender<bool>,
}

/// Per-instance prober.
pub struct HealthMonitor {
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
    breaker: Arc<CircuitBreaker>,
    history: Arc<dyn HealthHistory>,
    tasks: DashMap<String, MonitorTask>,
    generation: AtomicU64,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("monitored", &self.tasks.len())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(
        config: HealthCheckConfig,
        breaker: Arc<CircuitBreaker>,
        history: Arc<dyn HealthHistory>,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            config,
            client,
            breaker,
            history,
            tasks: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn history(&self) -> &Arc<dyn HealthHistory> {
        &self.history
    }

    /// Start probing an instance, replacing any task for the same id.
    ///
    /// The first probe fires immediately; later ones every `interval_ms`.
    pub fn start_health_check(
        self: &Arc<Self>,
        instance: Arc<ServiceInstance>,
        breaker_config: CircuitBreakerConfig,
    ) {
        if !self.config.enabled {
            tracing::debug!(instance = %instance.id, "Active health checks disabled, not monitoring");
            return;
        }

        let id = instance.id.clone();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (stop, mut stopped) = watch::channel(false);

        let previous = self.tasks.insert(
            id.clone(),
            MonitorTask {
                instance,
                breaker_config,
                generation,
                stop,
            },
        );
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }

        let monitor: Weak<Self> = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.interval_ms.max(1));
        tracing::info!(instance = %id, interval_ms = self.config.interval_ms, "Health check started");

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(monitor) = monitor.upgrade() else { break };
                        monitor.run_probe(&id, generation).await;
                    }
                    // Fires on stop and when the sender is dropped
                    _ = stopped.changed() => break,
                }
            }
            tracing::debug!(instance = %id, generation, "Health check task exited");
        });
    }

    /// Stop probing an instance. Returns false if it was not monitored.
    pub fn stop_health_check(&self, instance_id: &str) -> bool {
        match self.tasks.remove(instance_id) {
            Some((_, task)) => {
                let _ = task.stop.send(true);
                tracing::info!(instance = %instance_id, "Health check stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every task.
    pub fn stop_all(&self) {
        let ids: Vec<String> = self.tasks.iter().map(|t| t.key().clone()).collect();
        for id in &ids {
            if let Some((_, task)) = self.tasks.remove(id) {
                let _ = task.stop.send(true);
            }
        }
        tracing::info!(count = ids.len(), "All health checks stopped");
    }

    /// Ids of monitored instances, sorted.
    pub fn monitored(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.iter().map(|t| t.key().clone()).collect();
        ids.sort();
        ids
    }

    /// True if this exact instance is the one being probed under its id.
    pub fn is_monitoring(&self, instance: &Arc<ServiceInstance>) -> bool {
        self.tasks
            .get(&instance.id)
            .is_some_and(|t| Arc::ptr_eq(&t.instance, instance))
    }

    /// Probe a monitored instance now and apply the result.
    pub async fn probe_now(&self, instance_id: &str) -> Option<ProbeOutcome> {
        let generation = self.tasks.get(instance_id)?.generation;
        self.run_probe(instance_id, generation).await
    }

    async fn run_probe(&self, instance_id: &str, generation: u64) -> Option<ProbeOutcome> {
        let (instance, breaker_config) = {
            let task = self.tasks.get(instance_id)?;
            if task.generation != generation {
                return None;
            }
            (task.instance.clone(), task.breaker_config.clone())
        };

        let outcome = self.probe(&instance).await;

        let current = self.tasks.get(instance_id).map(|t| t.generation);
        if current != Some(generation) {
            tracing::debug!(instance = %instance_id, "Discarding probe result for stopped health check");
            return None;
        }

        self.apply(&instance, &breaker_config, &outcome).await;
        Some(outcome)
    }

    /// Issue one probe without applying it.
    pub async fn probe(&self, instance: &ServiceInstance) -> ProbeOutcome {
        let uri = probe_uri(instance.base_url(), &self.config.path);
        let request = match Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .header(header::USER_AGENT, "traffic-gateway-health-check")
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => {
                return ProbeOutcome {
                    status: HealthStatus::Unhealthy,
                    elapsed: Duration::ZERO,
                    error: Some(ProbeError::Request(e.to_string())),
                };
            }
        };

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let threshold = Duration::from_millis(self.config.degraded_threshold_ms);
        let start = Instant::now();

        match with_deadline(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let elapsed = start.elapsed();
                let ok = response.status().is_success();
                ProbeOutcome {
                    status: classify(ok, elapsed, threshold),
                    elapsed,
                    error: (!ok).then(|| ProbeError::Status(response.status())),
                }
            }
            Ok(Err(e)) => ProbeOutcome {
                status: HealthStatus::Unhealthy,
                elapsed: start.elapsed(),
                error: Some(ProbeError::Connection(e.to_string())),
            },
            Err(_) => ProbeOutcome {
                status: HealthStatus::Unhealthy,
                elapsed: start.elapsed(),
                error: Some(ProbeError::Timeout(timeout)),
            },
        }
    }

    async fn apply(
        &self,
        instance: &ServiceInstance,
        breaker_config: &CircuitBreakerConfig,
        outcome: &ProbeOutcome,
    ) {
        let was_healthy = instance.is_healthy();
        let now = now_millis();
        instance.set_health(outcome.status.into(), now);

        match outcome.status {
            HealthStatus::Healthy if !was_healthy => {
                tracing::info!(instance = %instance.id, "Instance recovered");
            }
            HealthStatus::Unhealthy => {
                let error = outcome.error.as_ref().map(ToString::to_string).unwrap_or_default();
                tracing::warn!(instance = %instance.id, error = %error, "Health check failed");
            }
            HealthStatus::Degraded => {
                tracing::warn!(
                    instance = %instance.id,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Instance degraded"
                );
            }
            _ => {}
        }

        self.history
            .record(HealthRecord {
                service: instance.id.clone(),
                status: outcome.status,
                response_time_ms: outcome.elapsed.as_millis() as u64,
                error: outcome.error.as_ref().map(ToString::to_string),
                timestamp: now,
            })
            .await;

        if outcome.status.is_success() {
            self.breaker.record_success(&instance.id, breaker_config).await;
        } else {
            self.breaker.record_failure(&instance.id, breaker_config).await;
        }

        metrics::record_health_probe(&instance.id, outcome.status, outcome.elapsed);
        metrics::record_instance_health(&instance.id, outcome.status);
    }
}

fn probe_uri(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::InstanceConfig;
    use crate::health::history::InMemoryHealthHistory;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::store::MemoryStore;

    fn monitor(config: HealthCheckConfig) -> Arc<HealthMonitor> {
        let breaker = Arc::new(CircuitBreaker::new(Arc::new(MemoryStore::new())));
        let history = Arc::new(InMemoryHealthHistory::new(100));
        Arc::new(HealthMonitor::new(config, breaker, history))
    }

    fn instance(url: &str) -> Arc<ServiceInstance> {
        Arc::new(
            ServiceInstance::from_config(&InstanceConfig {
                id: "i1".into(),
                url: url.into(),
                weight: 1,
                is_healthy: None,
            })
            .unwrap(),
        )
    }

    fn slow_config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval_ms: 3_600_000,
            timeout_ms: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_probe_uri() {
        assert_eq!(probe_uri("http://a:1", "/health"), "http://a:1/health");
        assert_eq!(probe_uri("http://a:1/api", "ready"), "http://a:1/api/ready");
    }

    #[tokio::test]
    async fn test_unreachable_instance_marked_unhealthy() {
        let monitor = monitor(slow_config());
        // Port 9 on localhost: connection refused
        let i = instance("http://127.0.0.1:9");
        monitor.start_health_check(i.clone(), CircuitBreakerConfig::default());

        let outcome = monitor.probe_now("i1").await.unwrap();
        assert_eq!(outcome.status, HealthStatus::Unhealthy);
        assert!(matches!(outcome.error, Some(ProbeError::Connection(_))));
        assert!(!i.is_healthy());
        assert!(i.last_health_check().is_some());

        let history = monitor.history().recent(Some("i1"), 10).await;
        assert!(!history.is_empty());
        assert_eq!(history[0].status, HealthStatus::Unhealthy);

        let state = monitor.breaker.get_state("i1").await;
        assert_eq!(state.state, CircuitState::Closed);
        assert!(state.failure_count >= 1);
        monitor.stop_all();
    }

    #[tokio::test]
    async fn test_start_replaces_and_stop_cancels() {
        let monitor = monitor(slow_config());
        let first = instance("http://127.0.0.1:9");
        let second = instance("http://127.0.0.1:9");

        monitor.start_health_check(first.clone(), CircuitBreakerConfig::default());
        monitor.start_health_check(second.clone(), CircuitBreakerConfig::default());
        assert_eq!(monitor.monitored(), vec!["i1".to_string()]);
        assert!(monitor.is_monitoring(&second));
        assert!(!monitor.is_monitoring(&first));

        assert!(monitor.stop_health_check("i1"));
        assert!(!monitor.stop_health_check("i1"));
        assert!(monitor.monitored().is_empty());
        assert!(monitor.probe_now("i1").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_monitor_starts_nothing() {
        let monitor = monitor(HealthCheckConfig {
            enabled: false,
            ..Default::default()
        });
        monitor.start_health_check(instance("http://127.0.0.1:9"), CircuitBreakerConfig::default());
        assert!(monitor.monitored().is_empty());
    }
}
