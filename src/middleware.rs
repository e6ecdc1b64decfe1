//! # HTTP Response Cache Middleware
//!
//! Tower layer that caches successful GET JSON responses at the HTTP
//! boundary. A hit replays the stored `{status, data, headers}` triple
//! without invoking the downstream handler; a miss lets the handler run,
//! returns its response unmodified, and persists it in a detached task.
//!
//! Any failure internal to caching degrades to pass-through: a store outage
//! makes every request behave as an always-miss cache, invisible to clients.

use crate::keys::generate_cache_key;
use crate::service::{CacheOptions, CacheService};
use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::{debug, error};

/// Request-to-key function, overriding the default path+sorted-query key.
pub type KeyGeneratorFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// HTTP cache configuration
#[derive(Clone)]
pub struct HttpCacheConfig {
    /// TTL for stored responses
    pub ttl: Duration,

    /// Key prefix, namespacing HTTP-level entries away from service-level
    /// ones
    pub key_prefix: String,

    /// Responses larger than this are served but never cached
    pub max_body_bytes: usize,

    /// Custom key generator; defaults to [`generate_cache_key`]
    pub key_generator: Option<KeyGeneratorFn>,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            key_prefix: "api:".to_string(),
            max_body_bytes: 1024 * 1024,
            key_generator: None,
        }
    }
}

impl HttpCacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }
}

impl fmt::Debug for HttpCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCacheConfig")
            .field("ttl", &self.ttl)
            .field("key_prefix", &self.key_prefix)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("key_generator", &self.key_generator.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Stored representation of a cached HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    data: serde_json::Value,
    headers: HashMap<String, String>,
    cached_at: DateTime<Utc>,
}

impl CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
            {
                headers.insert(name, value);
            }
        }

        (status, headers, Json(self.data)).into_response()
    }
}

/// Capture outgoing headers as strings. Framing headers are dropped; they
/// are recomputed when the cached body is replayed.
fn capture_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| **name != CONTENT_LENGTH && **name != TRANSFER_ENCODING)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

/// Tower layer caching successful GET JSON responses.
#[derive(Clone)]
pub struct HttpCacheLayer {
    cache: Arc<CacheService>,
    config: Arc<HttpCacheConfig>,
}

impl HttpCacheLayer {
    pub fn new(cache: Arc<CacheService>, config: HttpCacheConfig) -> Self {
        Self {
            cache,
            config: Arc::new(config),
        }
    }
}

/// Factory producing the pluggable response-caching layer.
pub fn cache_middleware(cache: Arc<CacheService>, config: HttpCacheConfig) -> HttpCacheLayer {
    HttpCacheLayer::new(cache, config)
}

impl<S> Layer<S> for HttpCacheLayer {
    type Service = HttpCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpCacheService {
            inner,
            cache: self.cache.clone(),
            config: self.config.clone(),
        }
    }
}

/// Tower service wrapping a handler with response caching.
#[derive(Clone)]
pub struct HttpCacheService<S> {
    inner: S,
    cache: Arc<CacheService>,
    config: Arc<HttpCacheConfig>,
}

impl<S> Service<Request> for HttpCacheService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let cache = self.cache.clone();
        let config = self.config.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // Non-GET requests never touch the cache, in either direction.
            if request.method() != Method::GET {
                return inner.call(request).await;
            }

            let cache_key = match &config.key_generator {
                Some(generator) => generator(&request),
                None => generate_cache_key(&request),
            };
            let options = CacheOptions::default()
                .with_prefix(config.key_prefix.clone())
                .with_ttl(config.ttl);

            if let Some(cached) = cache
                .get::<CachedResponse>(&cache_key, options.clone())
                .await
            {
                debug!("serving cached response for: {}", cache_key);
                return Ok(cached.into_response());
            }

            let response = inner.call(request).await?;

            // Only successful responses are ever stored; everything else
            // passes through untouched and re-executes next time.
            if !response.status().is_success() {
                return Ok(response);
            }

            let (parts, body) = response.into_parts();
            let bytes: Bytes = match to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("failed to buffer response body for {}: {}", cache_key, e);
                    return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
                }
            };

            if bytes.len() > config.max_body_bytes {
                debug!("response too large to cache: {}", cache_key);
            } else if let Ok(data) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                let entry = CachedResponse {
                    status: parts.status.as_u16(),
                    data,
                    headers: capture_headers(&parts.headers),
                    cached_at: Utc::now(),
                };

                // Detached write: the response must not wait on the store,
                // and a failed write is logged inside CacheService::set.
                tokio::spawn(async move {
                    cache.set(&cache_key, &entry, options).await;
                });
            } else {
                debug!("skipping cache for non-JSON response: {}", cache_key);
            }

            Ok(Response::from_parts(parts, Body::from(bytes)))
        })
    }
}
