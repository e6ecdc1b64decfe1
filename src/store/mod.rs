//! # Store Adapters
//!
//! Minimal async key-value surface the cache layer is built on. Two
//! implementations are provided: [`RedisStore`] for shared deployments and
//! [`InMemoryStore`] for tests and single-process use.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

use crate::CacheResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health probe report for a store.
///
/// Serializes to `{"status": "...", "message"?: "..."}` so it can be embedded
/// directly in a health endpoint payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StoreHealth {
    /// Connected and the liveness probe succeeded.
    Healthy,
    /// Connected but the probe failed; carries the captured error.
    Unhealthy { message: String },
    /// No connection is established; no I/O was attempted.
    Disconnected,
}

/// Trait for key-value store implementations.
///
/// Values are stored as UTF-8 strings (the service layer serializes to JSON
/// before writing). Network and protocol failures propagate to the caller;
/// error isolation is the responsibility of `CacheService`, not the store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the raw value for a key, or `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a value. With a TTL the store expires the key after that
    /// duration; without one the value persists until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove a key. Removing a missing key is a no-op, not an error.
    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Enumerate keys matching a glob-style pattern (`*` wildcard).
    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Atomically increment the integer counter at a key, creating it at 0
    /// first if absent. Returns the new value.
    async fn incr(&self, key: &str) -> CacheResult<i64>;

    /// (Re)apply a TTL to an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()>;

    /// Issue a lightweight liveness probe.
    async fn health_check(&self) -> StoreHealth;
}
