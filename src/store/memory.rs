//! # In-Memory Store
//!
//! A [`KeyValueStore`] backed by a process-local [`DashMap`]. Expiry is lazy:
//! entries past their deadline are dropped when read or scanned. The store
//! carries the same connect/disconnect lifecycle as the Redis adapter so
//! store-outage behavior can be exercised without a network dependency.

use super::{KeyValueStore, StoreHealth};
use crate::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory store implementation
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredEntry>,
    disconnected: AtomicBool,
}

impl InMemoryStore {
    /// Create a new store, ready for use without an explicit `connect()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the store connected again after a `disconnect()`.
    pub fn connect(&self) {
        self.disconnected.store(false, Ordering::SeqCst);
    }

    /// Mark the store disconnected: every operation fails with
    /// [`CacheError::NotConnected`] until `connect()`. Stored entries are
    /// kept, matching an external store surviving a dropped client.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Whether the store currently accepts operations.
    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> CacheResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CacheError::NotConnected)
        }
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Match `text` against a glob pattern where `*` matches any run of
/// characters (the subset of Redis MATCH syntax the cache layer uses).
fn glob_match(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == text;
    }

    let last = segments.len() - 1;
    let mut pos = 0;

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(segment) {
                return false;
            }
            pos = segment.len();
        } else if i == last {
            return text.len() >= pos && text[pos..].ends_with(segment);
        } else {
            match text[pos..].find(segment) {
                Some(idx) => pos += idx + segment.len(),
                None => return false,
            }
        }
    }

    true
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_connected()?;

        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.ensure_connected()?;

        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.ensure_connected()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.ensure_connected()?;

        let keys = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        Ok(keys)
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.ensure_connected()?;

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry {
                value: "0".to_string(),
                expires_at: None,
            });

        // An expired counter restarts from zero, as it would in Redis.
        if entry.is_expired() {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        let current: i64 = entry.value.parse().map_err(|_| CacheError::Store {
            message: format!("value at {key} is not an integer"),
        })?;
        let next = current + 1;
        entry.value = next.to_string();

        debug!("incremented {} to {}", key, next);
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        self.ensure_connected()?;

        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreHealth {
        if self.is_connected() {
            StoreHealth::Healthy
        } else {
            StoreHealth::Disconnected
        }
    }
}
