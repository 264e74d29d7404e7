//! Redis-backed state store.

use std::time::Duration;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::resilience::timeouts::with_deadline;
use crate::store::{StateStore, StoreError, StoreResult};

/// A `StateStore` shared by every gateway process through Redis.
///
/// Each command runs under `command_timeout`; a slow store surfaces as
/// `StoreError::Timeout` so the admission layers can fail open.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl RedisStore {
    /// Connect to Redis at `url` (`redis://`; TLS is not enabled).
    pub async fn connect(url: &str, command_timeout: Duration) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = with_deadline(command_timeout * 4, ConnectionManager::new(client))
            .await
            .map_err(|e| StoreError::Timeout(e.0))??;
        Ok(Self {
            conn,
            command_timeout,
        })
    }

    async fn run<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        with_deadline(self.command_timeout, fut)
            .await
            .map_err(|e| StoreError::Timeout(e.0))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.run(conn.get::<_, Option<String>>(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.run(conn.set_ex::<_, _, ()>(key, value, secs)).await
            }
            None => self.run(conn.set::<_, _, ()>(key, value)).await,
        }
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        self.run(conn.incr::<_, _, i64>(key, 1)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1) as i64;
        self.run(conn.expire::<_, bool>(key, secs)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self.run(conn.del::<_, i64>(key)).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = self.run(conn.keys::<_, Vec<String>>(pattern)).await?;
        keys.sort();
        Ok(keys)
    }
}
