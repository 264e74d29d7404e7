//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold within monitoring period
//! Open → Half-Open: admission check at or after next_attempt
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any failure (timeout restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per service identity; the gateway uses backend instance ids
//! - State lives in the shared store so every process sees the same circuit
//! - `check_circuit_breaker` is NOT a pure read: it performs Open → Half-Open
//! - Store errors fail open (the call is allowed)
//! - Stored with a TTL a minute past the open timeout; idle circuits vanish
//!   and read back as Closed

use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::clock::now_millis;
use crate::config::schema::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::store::{StateStore, StoreResult};

const KEY_PREFIX: &str = "circuit_breaker:";
const STATE_VERSION: u32 = 1;
const TTL_SLACK_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// A state change produced by one breaker operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Persisted breaker state for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    #[serde(default = "state_version")]
    pub v: u32,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds since the Unix epoch.
    pub last_failure_time: Option<u64>,
    /// Milliseconds since the Unix epoch.
    pub next_attempt: Option<u64>,
}

fn state_version() -> u32 {
    STATE_VERSION
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            v: STATE_VERSION,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            next_attempt: None,
        }
    }
}

impl CircuitBreakerState {
    /// Admission decision. Moves Open → Half-Open once `next_attempt` passed.
    pub fn admit(&mut self, now: u64) -> (bool, Option<Transition>) {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => (true, None),
            CircuitState::Open => {
                if self.next_attempt.map_or(true, |at| now >= at) {
                    let t = self.move_to(CircuitState::HalfOpen);
                    self.next_attempt = None;
                    (true, Some(t))
                } else {
                    (false, None)
                }
            }
        }
    }

    pub fn on_success(&mut self, config: &CircuitBreakerConfig) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= config.success_threshold {
                    let t = self.move_to(CircuitState::Closed);
                    self.last_failure_time = None;
                    self.next_attempt = None;
                    Some(t)
                } else {
                    None
                }
            }
            // Only the admission check leaves Open.
            CircuitState::Open => None,
        }
    }

    pub fn on_failure(&mut self, config: &CircuitBreakerConfig, now: u64) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                let stale = self
                    .last_failure_time
                    .is_some_and(|last| now.saturating_sub(last) > config.monitoring_period_ms);
                if stale {
                    self.failure_count = 0;
                }
                self.failure_count += 1;
                self.last_failure_time = Some(now);
                if self.failure_count >= config.failure_threshold {
                    Some(self.trip(config, now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => Some(self.trip(config, now)),
            CircuitState::Open => {
                self.last_failure_time = Some(now);
                None
            }
        }
    }

    fn trip(&mut self, config: &CircuitBreakerConfig, now: u64) -> Transition {
        let t = self.move_to(CircuitState::Open);
        self.last_failure_time = Some(now);
        self.next_attempt = Some(now + config.timeout_ms);
        t
    }

    fn move_to(&mut self, to: CircuitState) -> Transition {
        let from = self.state;
        self.state = to;
        self.failure_count = 0;
        self.success_count = 0;
        Transition { from, to }
    }
}

/// Store-backed circuit breakers keyed by service identity.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn StateStore>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn key(service: &str) -> String {
        format!("{}{}", KEY_PREFIX, service)
    }

    async fn load(&self, service: &str) -> StoreResult<CircuitBreakerState> {
        let Some(raw) = self.store.get(&Self::key(service)).await? else {
            return Ok(CircuitBreakerState::default());
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "Undecodable circuit state, treating as closed");
                Ok(CircuitBreakerState::default())
            }
        }
    }

    async fn save(&self, service: &str, state: &CircuitBreakerState, config: &CircuitBreakerConfig) {
        let raw = match serde_json::to_string(state) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(service = %service, error = %e, "Failed to encode circuit state");
                return;
            }
        };
        let ttl = Duration::from_secs(config.timeout_ms.div_ceil(1000) + TTL_SLACK_SECS);
        if let Err(e) = self.store.set(&Self::key(service), &raw, Some(ttl)).await {
            tracing::warn!(service = %service, error = %e, "Failed to persist circuit state");
            metrics::record_store_error("circuit_breaker");
        }
    }

    fn log_transition(service: &str, t: Transition) {
        tracing::info!(
            service = %service,
            from = t.from.as_str(),
            to = t.to.as_str(),
            "Circuit breaker transition"
        );
        metrics::record_circuit_transition(service, t.to.as_str());
    }

    /// Admission gate. May transition Open → Half-Open as a side effect.
    pub async fn check_circuit_breaker(&self, service: &str, config: &CircuitBreakerConfig) -> bool {
        let mut state = match self.load(service).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "Circuit store error, allowing call");
                metrics::record_store_error("circuit_breaker");
                return true;
            }
        };
        let (allowed, transition) = state.admit(now_millis());
        if let Some(t) = transition {
            Self::log_transition(service, t);
            self.save(service, &state, config).await;
        }
        allowed
    }

    pub async fn record_success(&self, service: &str, config: &CircuitBreakerConfig) {
        self.record(service, config, true).await
    }

    pub async fn record_failure(&self, service: &str, config: &CircuitBreakerConfig) {
        self.record(service, config, false).await
    }

    async fn record(&self, service: &str, config: &CircuitBreakerConfig, success: bool) {
        let mut state = match self.load(service).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "Circuit store error, outcome not recorded");
                metrics::record_store_error("circuit_breaker");
                return;
            }
        };
        let before = state.clone();
        let transition = if success {
            state.on_success(config)
        } else {
            state.on_failure(config, now_millis())
        };
        if let Some(t) = transition {
            Self::log_transition(service, t);
        }
        if state != before {
            self.save(service, &state, config).await;
        }
    }

    /// Current state without side effects. Store errors read as Closed.
    pub async fn get_state(&self, service: &str) -> CircuitBreakerState {
        self.load(service).await.unwrap_or_else(|e| {
            tracing::warn!(service = %service, error = %e, "Circuit store error on read");
            CircuitBreakerState::default()
        })
    }

    /// Forget a service's state, returning it to Closed.
    pub async fn reset_circuit_breaker(&self, service: &str) -> StoreResult<()> {
        self.store.delete(&Self::key(service)).await?;
        tracing::info!(service = %service, "Circuit breaker reset");
        Ok(())
    }

    /// Every stored circuit, sorted by service.
    pub async fn get_all_circuit_breakers(&self) -> StoreResult<Vec<(String, CircuitBreakerState)>> {
        let keys = self.store.keys(&format!("{}*", KEY_PREFIX)).await?;
        let mut all = Vec::with_capacity(keys.len());
        for key in keys {
            let service = key.trim_start_matches(KEY_PREFIX).to_string();
            if let Some(raw) = self.store.get(&key).await? {
                match serde_json::from_str(&raw) {
                    Ok(state) => all.push((service, state)),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Skipping undecodable circuit state"),
                }
            }
        }
        Ok(all)
    }
}
