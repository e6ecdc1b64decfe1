//! # Cache Service
//!
//! Typed, namespaced cache-aside operations on top of a [`KeyValueStore`].
//!
//! The guiding policy: the cache is a strictly optional accelerator. Read,
//! write, and delete failures are logged and swallowed so a store outage
//! degrades to an always-miss cache instead of failing the caller. The two
//! exceptions carry business meaning beyond caching: [`CacheService::increment`]
//! (counters are load-bearing, e.g. rate limits) and the fetch step of
//! [`CacheService::get_or_set`] surface their errors.

use crate::store::KeyValueStore;
use crate::CacheResult;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Service-wide defaults, injected at construction time.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a call passes no explicit TTL.
    pub default_ttl: Duration,

    /// Namespace prefix applied when a call passes no explicit prefix.
    pub default_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            default_prefix: "eucharist:".to_string(),
        }
    }
}

/// Per-call overrides for TTL and key namespace.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Time to live; falls back to the service default when `None`.
    pub ttl: Option<Duration>,

    /// Key prefix for namespacing; falls back to the service default.
    pub prefix: Option<String>,
}

impl CacheOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Cache-aside service over a key-value store.
pub struct CacheService {
    store: Arc<dyn KeyValueStore>,
    defaults: RwLock<CacheConfig>,
}

impl CacheService {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            store,
            defaults: RwLock::new(config),
        }
    }

    /// The underlying store, e.g. for wiring a health endpoint.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Compose the physical cache key from the namespace prefix and the
    /// caller's key.
    fn cache_key(&self, key: &str, prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => format!("{}{}", self.defaults.read().default_prefix, key),
        }
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or_else(|| self.defaults.read().default_ttl)
    }

    /// Serialize and store a value. Best-effort: store and serialization
    /// failures are logged, never surfaced.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: CacheOptions) {
        let cache_key = self.cache_key(key, options.prefix.as_deref());
        let ttl = self.effective_ttl(options.ttl);

        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!("failed to serialize cache value for {}: {}", cache_key, e);
                return;
            }
        };

        match self.store.set(&cache_key, &serialized, Some(ttl)).await {
            Ok(()) => debug!("cache set: {} (ttl: {:?})", cache_key, ttl),
            Err(e) => error!("failed to set cache for {}: {}", cache_key, e),
        }
    }

    /// Fetch and deserialize a value. Store errors and undecodable payloads
    /// are treated as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: CacheOptions) -> Option<T> {
        let cache_key = self.cache_key(key, options.prefix.as_deref());

        let raw = match self.store.get(&cache_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("cache miss: {}", cache_key);
                return None;
            }
            Err(e) => {
                error!("failed to get cache for {}: {}", cache_key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("cache hit: {}", cache_key);
                Some(value)
            }
            Err(e) => {
                error!("failed to deserialize cache value for {}: {}", cache_key, e);
                None
            }
        }
    }

    /// Remove a key. Best-effort; errors are logged only.
    pub async fn del(&self, key: &str, options: CacheOptions) {
        let cache_key = self.cache_key(key, options.prefix.as_deref());
        match self.store.del(&cache_key).await {
            Ok(()) => debug!("cache deleted: {}", cache_key),
            Err(e) => error!("failed to delete cache for {}: {}", cache_key, e),
        }
    }

    /// Remove every key matching a glob-style pattern under the namespace,
    /// e.g. `del_pattern("user:*", ...)`. Zero matches is a successful no-op;
    /// enumeration is not atomic with concurrent writers.
    pub async fn del_pattern(&self, pattern: &str, options: CacheOptions) {
        let cache_pattern = self.cache_key(pattern, options.prefix.as_deref());

        let keys = match self.store.scan(&cache_pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("failed to scan cache pattern {}: {}", cache_pattern, e);
                return;
            }
        };

        let mut deleted = 0usize;
        for key in &keys {
            match self.store.del(key).await {
                Ok(()) => deleted += 1,
                Err(e) => error!("failed to delete cache key {}: {}", key, e),
            }
        }

        if deleted > 0 {
            debug!("cache pattern deleted: {} ({} keys)", cache_pattern, deleted);
        }
    }

    /// Classic cache-aside: return the cached value if present, otherwise run
    /// `fetch_fn`, persist its result, and return it.
    ///
    /// Fetch errors are real failures and propagate unchanged; nothing is
    /// written when the fetch fails. Cache-internal failures on either side
    /// of the fetch stay swallowed as usual.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        fetch_fn: F,
        options: CacheOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key, options.clone()).await {
            return Ok(cached);
        }

        match fetch_fn().await {
            Ok(fresh) => {
                self.set(key, &fresh, options).await;
                Ok(fresh)
            }
            Err(e) => {
                error!("failed to fetch data for cache key {}", key);
                Err(e)
            }
        }
    }

    /// Whether a live (non-expired) value is present. Implemented as a
    /// presence read; store errors report `false`.
    pub async fn exists(&self, key: &str, options: CacheOptions) -> bool {
        let cache_key = self.cache_key(key, options.prefix.as_deref());
        match self.store.get(&cache_key).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                error!("failed to check cache existence for {}: {}", cache_key, e);
                false
            }
        }
    }

    /// Atomically increment the counter at a key, creating it at 0 first if
    /// absent. A TTL is (re)applied only when `options.ttl` is explicitly
    /// given. Errors propagate: counters are load-bearing and must not fail
    /// silently.
    pub async fn increment(&self, key: &str, options: CacheOptions) -> CacheResult<i64> {
        let cache_key = self.cache_key(key, options.prefix.as_deref());

        let value = self.store.incr(&cache_key).await?;
        if let Some(ttl) = options.ttl {
            self.store.expire(&cache_key, ttl).await?;
        }

        debug!("cache incremented: {} to {}", cache_key, value);
        Ok(value)
    }

    /// Change the default TTL for subsequent calls. Already-stored entries
    /// keep the TTL they were written with.
    pub fn set_default_ttl(&self, ttl: Duration) {
        self.defaults.write().default_ttl = ttl;
    }

    /// Change the default key prefix for subsequent calls. Entries stored
    /// under the old prefix are not rewritten.
    pub fn set_default_prefix(&self, prefix: impl Into<String>) {
        self.defaults.write().default_prefix = prefix.into();
    }
}
