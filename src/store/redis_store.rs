//! # Redis Store
//!
//! Redis-backed [`KeyValueStore`] built on a shared
//! [`redis::aio::ConnectionManager`]. The store owns the connection
//! lifecycle: it is created without I/O, connected explicitly, and every
//! operation fails with [`CacheError::NotConnected`] until then.

use super::{KeyValueStore, StoreHealth};
use crate::{CacheError, CacheResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Redis store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Timeout for establishing the initial connection
    pub connection_timeout: Duration,

    /// Maximum number of retries per command
    pub max_retries: u32,

    /// Base delay between retries (grows linearly with the attempt number)
    pub retry_delay: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Redis store implementation
pub struct RedisStore {
    config: RedisStoreConfig,

    /// Shared connection handle; `None` until `connect()` succeeds.
    connection: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Create a new store. Performs no I/O; call [`RedisStore::connect`]
    /// before issuing commands.
    pub fn new(config: RedisStoreConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
        }
    }

    /// Establish the connection and verify it with a PING.
    ///
    /// Idempotent: calling while already connected is a no-op, and concurrent
    /// callers serialize on the connection lock so at most one connection is
    /// ever established.
    pub async fn connect(&self) -> CacheResult<()> {
        let mut guard = self.connection.write().await;
        if guard.is_some() {
            debug!("redis store already connected");
            return Ok(());
        }

        let client = Client::open(self.config.url.as_str())?;
        let mut manager = tokio::time::timeout(
            self.config.connection_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| CacheError::Store {
            message: format!(
                "timed out connecting to {} after {:?}",
                self.config.url, self.config.connection_timeout
            ),
        })??;

        redis::cmd("PING")
            .query_async::<_, String>(&mut manager)
            .await?;

        *guard = Some(manager);
        info!("redis store connected to {}", self.config.url);
        Ok(())
    }

    /// Drop the connection. Idempotent; a no-op if never connected.
    pub async fn disconnect(&self) {
        let mut guard = self.connection.write().await;
        if guard.take().is_some() {
            info!("redis store disconnected");
        }
    }

    /// Whether a connection is currently established.
    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Clone out the shared connection handle, or fail if not connected.
    async fn connection(&self) -> CacheResult<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(CacheError::NotConnected)
    }

    /// Execute a Redis operation, retrying transient failures with linear
    /// backoff. The connection handle is re-fetched on every attempt so a
    /// reconnect between attempts is picked up.
    async fn execute_with_retry<T, F>(&self, operation: F) -> CacheResult<T>
    where
        F: Fn(ConnectionManager) -> BoxFuture<'static, RedisResult<T>> + Send + Sync,
        T: Send,
    {
        let mut attempt: u32 = 0;

        loop {
            let conn = self.connection().await?;

            match operation(conn).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        return Err(CacheError::Redis(e));
                    }
                    attempt += 1;
                    warn!("redis command failed (attempt {}): {}", attempt, e);
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let key = key.to_string();
        self.execute_with_retry(|mut conn| {
            let key = key.clone();
            Box::pin(async move { conn.get::<_, Option<String>>(&key).await })
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let key = key.to_string();
        let value = value.to_string();

        match ttl {
            Some(ttl) => {
                // SETEX rejects a zero expiry; sub-second TTLs round up.
                let seconds = ttl.as_secs().max(1);
                self.execute_with_retry(|mut conn| {
                    let key = key.clone();
                    let value = value.clone();
                    Box::pin(async move {
                        redis::cmd("SETEX")
                            .arg(&key)
                            .arg(seconds)
                            .arg(&value)
                            .query_async::<_, ()>(&mut conn)
                            .await
                    })
                })
                .await
            }
            None => {
                self.execute_with_retry(|mut conn| {
                    let key = key.clone();
                    let value = value.clone();
                    Box::pin(async move { conn.set::<_, _, ()>(&key, &value).await })
                })
                .await
            }
        }
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let key = key.to_string();
        let _deleted: i32 = self
            .execute_with_retry(|mut conn| {
                let key = key.clone();
                Box::pin(async move { conn.del(&key).await })
            })
            .await?;
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let pattern = pattern.to_string();
        self.execute_with_retry(|mut conn| {
            let pattern = pattern.clone();
            Box::pin(async move {
                let mut cursor = 0u64;
                let mut all_keys = Vec::new();

                loop {
                    let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn)
                        .await?;

                    all_keys.extend(keys);

                    if new_cursor == 0 {
                        break;
                    }
                    cursor = new_cursor;
                }

                Ok::<Vec<String>, redis::RedisError>(all_keys)
            })
        })
        .await
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let key = key.to_string();
        self.execute_with_retry(|mut conn| {
            let key = key.clone();
            Box::pin(async move { conn.incr::<_, _, i64>(&key, 1).await })
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let key = key.to_string();
        let seconds = ttl.as_secs().max(1);
        let _set: i32 = self
            .execute_with_retry(|mut conn| {
                let key = key.clone();
                Box::pin(async move {
                    redis::cmd("EXPIRE")
                        .arg(&key)
                        .arg(seconds)
                        .query_async(&mut conn)
                        .await
                })
            })
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreHealth {
        let conn = self.connection.read().await.clone();
        let Some(mut conn) = conn else {
            return StoreHealth::Disconnected;
        };

        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => StoreHealth::Healthy,
            Err(e) => StoreHealth::Unhealthy {
                message: e.to_string(),
            },
        }
    }
}
