//! # Cache Key Derivation
//!
//! Helpers turning an HTTP request into a deterministic cache key. Query
//! pairs are sorted so two logically identical requests with differently
//! ordered query strings map to the same key.

use axum::http::Request;
use url::form_urlencoded;

/// Authenticated principal, inserted into request extensions by the
/// application's auth middleware and consumed by
/// [`generate_user_cache_key`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

/// Derive a cache key from the request path and query.
///
/// Returns the path alone when there is no query, otherwise
/// `path?k=v&...` with the decoded pairs sorted ascending.
pub fn generate_cache_key<B>(req: &Request<B>) -> String {
    let path = req.uri().path();

    let query = match req.uri().query() {
        Some(query) if !query.is_empty() => query,
        _ => return path.to_string(),
    };

    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    let sorted_query = pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    format!("{path}?{sorted_query}")
}

/// Derive a user-scoped cache key: `user:<id>:<generate_cache_key(req)>`.
///
/// The id comes from an [`AuthUser`] request extension; unauthenticated
/// requests share the `anonymous` scope.
pub fn generate_user_cache_key<B>(req: &Request<B>) -> String {
    let user_id = req
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.id.as_str())
        .unwrap_or("anonymous");

    format!("user:{}:{}", user_id, generate_cache_key(req))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn request(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn path_only_when_no_query() {
        assert_eq!(generate_cache_key(&request("/api/articles")), "/api/articles");
    }

    #[test]
    fn query_pairs_are_sorted() {
        assert_eq!(
            generate_cache_key(&request("/s?z=1&a=2")),
            "/s?a=2&z=1"
        );
    }

    #[test]
    fn key_is_invariant_under_query_order() {
        let first = generate_cache_key(&request("/s?z=1&a=2"));
        let second = generate_cache_key(&request("/s?a=2&z=1"));
        assert_eq!(first, second);
    }

    #[test]
    fn repeated_keys_sort_stably_by_value() {
        let first = generate_cache_key(&request("/s?tag=b&tag=a"));
        let second = generate_cache_key(&request("/s?tag=a&tag=b"));
        assert_eq!(first, second);
        assert_eq!(first, "/s?tag=a&tag=b");
    }

    #[test]
    fn user_key_prefixes_authenticated_id() {
        let mut req = request("/api/profile?full=1");
        req.extensions_mut().insert(AuthUser {
            id: "42".to_string(),
        });

        assert_eq!(
            generate_user_cache_key(&req),
            "user:42:/api/profile?full=1"
        );
    }

    #[test]
    fn user_key_falls_back_to_anonymous() {
        assert_eq!(
            generate_user_cache_key(&request("/api/profile")),
            "user:anonymous:/api/profile"
        );
    }
}
