//! In-process state store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

use crate::store::{glob_match, StateStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Writes between two sweeps of expired entries.
const SWEEP_EVERY: u64 = 1024;

/// A `StateStore` held in a concurrent map.
///
/// Expired entries are dropped when next touched or scanned, and every
/// `sweep_every` writes a full sweep reclaims keys nobody reads again
/// (rate-limit windows).
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    writes: AtomicU64,
    sweep_every: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_sweep_every(SWEEP_EVERY)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store sweeping expired entries every `writes` writes (minimum 1).
    pub fn with_sweep_every(writes: u64) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
            sweep_every: writes.max(1),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Swept expired store entries");
        }
        removed
    }

    /// Must be called with no map guard held.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_every == 0 {
            self.sweep_expired();
        }
    }

    /// Entries held in memory, expired or not.
    #[cfg(test)]
    fn stored_entries(&self) -> usize {
        self.entries.len()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.record_write();
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let now = Instant::now();
        // The shard lock held by `entry` makes read-increment-write atomic.
        let next = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    };
                    1
                } else {
                    let current: i64 = entry.value.parse().map_err(|_| StoreError::Corrupt {
                        key: key.to_string(),
                        reason: "value is not an integer".to_string(),
                    })?;
                    entry.value = (current + 1).to_string();
                    current + 1
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: "1".to_string(),
                    expires_at: None,
                });
                1
            }
        };
        self.record_write();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        self.entries.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store.set("k", "v", Some(Duration::from_millis(20))).await.unwrap();
        assert!(store.ttl("k").is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_incr_and_expire() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);

        assert!(store.expire("c", Duration::from_millis(20)).await.unwrap());
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        // Expired counter restarts at 1
        assert_eq!(store.incr("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = MemoryStore::new();
        store.set("c", "abc", None).await.unwrap();
        assert!(matches!(store.incr("c").await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_incr() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let s = store.clone();
            handles.push(tokio::spawn(async move { s.incr("hits").await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("hits").await.unwrap().as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn test_expired_windows_reclaimed_without_reads() {
        let store = MemoryStore::with_sweep_every(100);
        for window in 0..1000 {
            let key = format!("rate_limit:ip:10.0.0.1:{}", window);
            store.incr(&key).await.unwrap();
            store.expire(&key, Duration::from_millis(1)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Fresh windows only; the old keys are never touched again
        for window in 1000..1100 {
            store.incr(&format!("rate_limit:ip:10.0.0.1:{}", window)).await.unwrap();
        }
        assert_eq!(store.stored_entries(), 100);
        assert_eq!(store.len(), 100);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        let store = MemoryStore::new();
        store.set("short", "1", Some(Duration::from_millis(1))).await.unwrap();
        store.set("long", "1", Some(Duration::from_secs(60))).await.unwrap();
        store.set("forever", "1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.stored_entries(), 2);
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_keys_pattern() {
        let store = MemoryStore::new();
        store.set("circuit_breaker:a", "{}", None).await.unwrap();
        store.set("circuit_breaker:b", "{}", None).await.unwrap();
        store.set("rate_limit:x:1", "3", None).await.unwrap();

        let keys = store.keys("circuit_breaker:*").await.unwrap();
        assert_eq!(keys, vec!["circuit_breaker:a", "circuit_breaker:b"]);
    }
}
