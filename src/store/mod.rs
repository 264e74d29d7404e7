//! Shared state store subsystem.
//!
//! # Data Flow
//! ```text
//! RateLimiter      → incr / expire   ┐
//! CircuitBreaker   → get / set / del │→ StateStore (trait)
//! Admin API        → keys            ┘      ├─ memory.rs (in-process, DashMap)
//!                                           └─ redis.rs  (shared, Redis)
//! ```
//!
//! # Design Decisions
//! - Narrow async interface so tests run against the in-memory store
//! - Atomicity of counters comes from the store, never from an in-process lock
//! - Every store error is transient from the caller's point of view;
//!   the admission layers fail open on any `StoreError`

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::schema::{StoreBackend, StoreConfig};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by a state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The command did not complete within its deadline.
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    /// A stored value could not be interpreted.
    #[error("corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store with atomic increments and expiring keys.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Get a value by key.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Atomically increment an integer counter, creating it at 1.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Set a TTL on an existing key. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// List keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;
}

/// Build the store selected in configuration.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn StateStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-process state store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let timeout = Duration::from_millis(config.command_timeout_ms);
            let store = RedisStore::connect(&config.url, timeout).await?;
            tracing::info!(url = %config.url, "Connected to Redis state store");
            Ok(Arc::new(store))
        }
    }
}

/// Glob match supporting `*` (any run) and `?` (one char), as Redis `KEYS` does.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    let (mut pi, mut ci) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ci < c.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == c[ci]) {
            pi += 1;
            ci += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ci));
            pi += 1;
        } else if let Some((sp, sc)) = star {
            pi = sp + 1;
            ci = sc + 1;
            star = Some((sp, sc + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
