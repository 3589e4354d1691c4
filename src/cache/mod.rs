//! Best-effort read-through cache for static assets.
//!
//! # Responsibilities
//! - Serve eligible GET requests from memory, keyed by the full request URL
//! - Populate entries from the upstream on miss
//! - Stay entirely out of the way for application traffic and non-GETs
//!
//! # Design Decisions
//! - Only responses with a known content length under the size cap are
//!   stored; anything else streams through uncached rather than being
//!   buffered speculatively
//! - Disabled by default; the cache is an optimization, never a correctness
//!   requirement

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use dashmap::DashMap;

use crate::config::CacheConfig;
use crate::net::NetworkFetch;
use crate::observability::metrics;

/// A fully-buffered response, replayable any number of times.
#[derive(Debug, Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl CachedResponse {
    fn replay(&self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// In-memory read-through cache, scoped to the registry lifetime.
pub struct AssetCache {
    enabled: bool,
    prefixes: Vec<String>,
    max_entry_bytes: usize,
    entries: DashMap<String, CachedResponse>,
}

impl AssetCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            prefixes: config.prefixes.clone(),
            max_entry_bytes: config.max_entry_bytes,
            entries: DashMap::new(),
        }
    }

    /// Whether this URL is eligible for the cache at all. The caller has
    /// already established that the method is GET and that the request is
    /// not application traffic.
    pub fn is_cacheable(&self, uri: &Uri) -> bool {
        self.enabled
            && self
                .prefixes
                .iter()
                .any(|prefix| uri.path().starts_with(prefix.as_str()))
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serve from the cache, falling back to the upstream and storing the
    /// result when it is small enough to buffer.
    pub async fn get_or_fetch(
        &self,
        request: Request<Body>,
        upstream: &dyn NetworkFetch,
    ) -> Response<Body> {
        let key = request.uri().to_string();

        if let Some(entry) = self.entries.get(&key) {
            metrics::record_cache_lookup(true);
            return entry.replay();
        }
        metrics::record_cache_lookup(false);

        let response = match upstream.fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%key, error = %err, "cache fill fetch failed");
                let mut response =
                    Response::new(Body::from("Failed to find in cache, or fetch."));
                *response.status_mut() = StatusCode::NOT_FOUND;
                return response;
            }
        };

        if !self.should_store(&response) {
            return response;
        }

        let (parts, body) = response.into_parts();
        match axum::body::to_bytes(body, self.max_entry_bytes).await {
            Ok(bytes) => {
                let entry = CachedResponse {
                    status: parts.status,
                    headers: parts.headers.clone(),
                    body: bytes,
                };
                let response = entry.replay();
                self.entries.insert(key, entry);
                metrics::record_cache_size(self.entries.len());
                response
            }
            Err(err) => {
                // The body is consumed; all that is left is to report it.
                tracing::warn!(%key, error = %err, "buffering cache entry failed");
                let mut response = Response::new(Body::from("Upstream body read failed."));
                *response.status_mut() = StatusCode::BAD_GATEWAY;
                response
            }
        }
    }

    fn should_store(&self, response: &Response<Body>) -> bool {
        if !response.status().is_success() {
            return false;
        }
        // Unknown or oversized bodies stream through uncached.
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .is_some_and(|len| len <= self.max_entry_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUpstream {
        calls: AtomicUsize,
        status: StatusCode,
    }

    impl CountingUpstream {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                status: StatusCode::OK,
            }
        }
    }

    #[async_trait]
    impl NetworkFetch for CountingUpstream {
        async fn fetch(
            &self,
            request: Request<Body>,
        ) -> Result<Response<Body>, crate::error::ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = format!("asset:{}", request.uri().path());
            let mut response = Response::new(Body::from(body.clone()));
            *response.status_mut() = self.status;
            response
                .headers_mut()
                .insert(CONTENT_LENGTH, body.len().into());
            Ok(response)
        }
    }

    fn cache(enabled: bool) -> AssetCache {
        AssetCache::new(&CacheConfig {
            enabled,
            prefixes: vec!["/assets/".to_string()],
            max_entry_bytes: 1024,
        })
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn eligibility_requires_enabled_and_prefix() {
        let cache = cache(true);
        assert!(cache.is_cacheable(&"/assets/app.js".parse().unwrap()));
        assert!(!cache.is_cacheable(&"/index.html".parse().unwrap()));
        assert!(!self::cache(false).is_cacheable(&"/assets/app.js".parse().unwrap()));
    }

    #[tokio::test]
    async fn second_hit_is_served_from_memory() {
        let cache = cache(true);
        let upstream = CountingUpstream::ok();

        let first = cache.get_or_fetch(get("/assets/app.js"), &upstream).await;
        assert_eq!(first.status(), StatusCode::OK);
        let second = cache.get_or_fetch(get("/assets/app.js"), &upstream).await;
        assert_eq!(second.status(), StatusCode::OK);

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        let body = axum::body::to_bytes(second.into_body(), 1024).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"asset:/assets/app.js"));
    }

    #[tokio::test]
    async fn distinct_urls_get_distinct_entries() {
        let cache = cache(true);
        let upstream = CountingUpstream::ok();

        cache.get_or_fetch(get("/assets/a.js"), &upstream).await;
        cache.get_or_fetch(get("/assets/b.js"), &upstream).await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn error_statuses_are_not_stored() {
        let cache = cache(true);
        let upstream = CountingUpstream {
            calls: AtomicUsize::new(0),
            status: StatusCode::NOT_FOUND,
        };

        cache.get_or_fetch(get("/assets/missing.js"), &upstream).await;
        cache.get_or_fetch(get("/assets/missing.js"), &upstream).await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
