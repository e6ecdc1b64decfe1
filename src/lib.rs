//! # Eucharist Cache
//!
//! Redis-backed caching layer for the Eucharist platform API. It provides
//! three pieces that compose bottom-up:
//!
//! 1. **Store adapters** ([`store`]): a minimal async key-value surface
//!    (`get`/`set`-with-TTL/`del`/pattern `scan`/`incr`/health probe) with a
//!    Redis implementation owning the shared connection, plus an in-memory
//!    implementation for tests and single-process deployments.
//! 2. **[`CacheService`]**: typed, namespaced cache-aside operations on top
//!    of a store. Cache failures are isolated — a broken store degrades to
//!    an always-miss cache instead of failing the caller.
//! 3. **HTTP middleware** ([`middleware`]): a tower layer that serves
//!    successful GET JSON responses from the cache and transparently
//!    persists fresh ones after the handler runs.
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use eucharist_cache::{CacheConfig, CacheOptions, CacheService, RedisStore, RedisStoreConfig};
//!
//! # async fn run() -> eucharist_cache::CacheResult<()> {
//! let store = Arc::new(RedisStore::new(RedisStoreConfig::default()));
//! store.connect().await?;
//!
//! let cache = CacheService::new(store, CacheConfig::default());
//! cache.set("articles:latest", &vec!["slug-1", "slug-2"], CacheOptions::default()).await;
//!
//! let latest: Option<Vec<String>> = cache.get("articles:latest", CacheOptions::default()).await;
//! # Ok(())
//! # }
//! ```

pub mod keys;
pub mod middleware;
pub mod service;
pub mod store;

pub use keys::{generate_cache_key, generate_user_cache_key, AuthUser};
pub use middleware::{
    cache_middleware, HttpCacheConfig, HttpCacheLayer, HttpCacheService, KeyGeneratorFn,
};
pub use service::{CacheConfig, CacheOptions, CacheService};
pub use store::{InMemoryStore, KeyValueStore, RedisStore, RedisStoreConfig, StoreHealth};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("store not connected; call connect() first")]
    NotConnected,

    #[error("store operation failed: {message}")]
    Store { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
