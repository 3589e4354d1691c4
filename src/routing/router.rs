//! Request dispatch.
//!
//! # Responsibilities
//! - Decide application traffic vs static asset for every intercepted request
//! - Look up the owning application instance, tolerating registration races
//!   with a bounded, jittered retry
//! - Strip the synthetic prefix before bridging, select the HTML-injection
//!   filter for root documents, apply isolation headers on opt-in
//! - Route static GETs through the cache policy, everything else straight
//!   through to the upstream
//!
//! # Design Decisions
//! - Lookup retry is a hard cap; exhaustion yields a 404 explaining that the
//!   registration may be stale, never an unbounded wait
//! - A failed exchange surfaces as 502 for that request only; concurrent
//!   exchanges are untouched because each owns a private endpoint

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::uri::PathAndQuery;
use axum::http::{request::Parts, Method, Request, Response, StatusCode, Uri};

use crate::app::{spawn_instance, AppContract, AppHandle, ControlMessage};
use crate::cache::AssetCache;
use crate::channel::endpoint_pair;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::client::fetch_app;
use crate::http::postprocess::{
    add_isolation_headers, coi_requested, inject_script_filter, BOOTSTRAP_SCRIPT,
};
use crate::net::NetworkFetch;
use crate::observability::metrics;
use crate::resilience::calculate_backoff;
use crate::routing::matcher::{match_app_path, AppPath};
use crate::routing::registry::AppRegistry;
use crate::websocket::VirtualSocket;

/// Router knobs, extracted from the configuration once at startup.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Maximum registration lookup attempts before giving up.
    pub lookup_attempts: u32,
    /// Base delay for the lookup backoff, in milliseconds.
    pub lookup_base_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub lookup_max_delay_ms: u64,
    /// Serving-side idle timeout applied to every exchange.
    pub idle_timeout: Duration,
    /// Path the bootstrap script is served from, and the `src` injected
    /// into application root documents.
    pub script_path: String,
}

impl RouterSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            lookup_attempts: config.registry.lookup_attempts,
            lookup_base_delay_ms: config.registry.lookup_base_delay_ms,
            lookup_max_delay_ms: config.registry.lookup_max_delay_ms,
            idle_timeout: Duration::from_secs(config.serving.idle_timeout_secs),
            script_path: config.inject.script_path.clone(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Routing decision for one request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Application traffic under a registered (or soon-registered) prefix.
    Application(AppPath),
    /// Pass-through traffic subject to the cache policy.
    StaticAsset,
}

/// The intercepting-proxy router: owns the registry, the cache policy and
/// the upstream seam, and dispatches every intercepted request.
pub struct Router {
    registry: Arc<AppRegistry>,
    cache: Arc<AssetCache>,
    upstream: Arc<dyn NetworkFetch>,
    settings: RouterSettings,
}

impl Router {
    pub fn new(
        registry: Arc<AppRegistry>,
        cache: Arc<AssetCache>,
        upstream: Arc<dyn NetworkFetch>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            upstream,
            settings,
        }
    }

    /// The registry this router reads from.
    pub fn registry(&self) -> &AppRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Spawn an application instance and announce it immediately, before any
    /// request can race the registration.
    pub fn launch(&self, app: Arc<dyn AppContract>) -> AppHandle {
        let handle = spawn_instance(app, self.settings.idle_timeout);
        self.registry.register(handle.prefix().to_string(), handle.clone());
        handle
    }

    /// Retire an instance: remove its registration and stop its worker.
    pub fn retire(&self, prefix: &str) {
        if let Some(handle) = self.registry.deregister(prefix) {
            handle.shutdown();
        }
    }

    /// Classify a request path.
    pub fn route(&self, path: &str) -> RouteDecision {
        match match_app_path(path) {
            Some(app_path) => RouteDecision::Application(app_path),
            None => RouteDecision::StaticAsset,
        }
    }

    /// Dispatch one intercepted request to completion. Infallible: every
    /// failure mode becomes a status-coded response.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        if path == self.settings.script_path {
            return bootstrap_response();
        }

        let (kind, response) = match self.route(&path) {
            RouteDecision::Application(app_path) => {
                ("app", self.dispatch_app(app_path, request).await)
            }
            RouteDecision::StaticAsset => ("static", self.dispatch_static(request).await),
        };
        metrics::record_request(method.as_str(), response.status().as_u16(), kind, start);
        response
    }

    /// Open a virtual socket to the application owning `prefix`. WebSocket
    /// upgrades always bypass the cache policy and come straight here.
    pub async fn open_socket(&self, prefix: &str, path: &str) -> Result<VirtualSocket, ProxyError> {
        let handle = self
            .lookup_with_retry(prefix)
            .await
            .ok_or_else(|| ProxyError::StaleRegistration(prefix.to_string()))?;
        let (ours, theirs) = endpoint_pair();
        handle.send(ControlMessage::OpenSocket {
            path: path.to_string(),
            endpoint: theirs,
        })?;
        Ok(VirtualSocket::new(ours))
    }

    async fn dispatch_app(&self, app_path: AppPath, request: Request<Body>) -> Response<Body> {
        let Some(handle) = self.lookup_with_retry(&app_path.prefix).await else {
            metrics::record_stale_lookup(&app_path.prefix);
            return stale_registration_response(&app_path.prefix);
        };

        let (mut parts, body) = request.into_parts();
        let coi = coi_requested(&parts);
        if let Err(err) = strip_prefix(&mut parts, &app_path.stripped) {
            tracing::warn!(error = %err, prefix = %app_path.prefix, "request path rewrite failed");
            return text_response(StatusCode::BAD_REQUEST, "Malformed application path.");
        }

        // The root document gets the bootstrap script spliced into its head.
        let filter = app_path
            .is_root
            .then(|| inject_script_filter(&self.settings.script_path));

        match fetch_app(&handle, Request::from_parts(parts, body), filter).await {
            Ok(response) if coi => add_isolation_headers(response),
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(prefix = %app_path.prefix, error = %err, "application exchange failed");
                text_response(
                    StatusCode::BAD_GATEWAY,
                    format!("Application exchange failed: {err}"),
                )
            }
        }
    }

    async fn dispatch_static(&self, request: Request<Body>) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let coi = coi_requested(&parts);
        let request = Request::from_parts(parts, body);

        let response = if request.method() == Method::GET
            && self.cache.is_cacheable(request.uri())
        {
            self.cache
                .get_or_fetch(request, self.upstream.as_ref())
                .await
        } else {
            match self.upstream.fetch(request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(error = %err, "upstream fetch failed");
                    text_response(StatusCode::BAD_GATEWAY, "Upstream request failed.")
                }
            }
        };

        if coi {
            add_isolation_headers(response)
        } else {
            response
        }
    }

    /// Bounded lookup: a request may arrive before the instance it targets
    /// has announced itself, so wait out a short registration window.
    async fn lookup_with_retry(&self, prefix: &str) -> Option<AppHandle> {
        let settings = &self.settings;
        for attempt in 0..settings.lookup_attempts {
            if let Some(handle) = self.registry.lookup(prefix) {
                return Some(handle);
            }
            if attempt + 1 == settings.lookup_attempts {
                break;
            }
            let delay = calculate_backoff(
                attempt + 1,
                settings.lookup_base_delay_ms,
                settings.lookup_max_delay_ms,
            );
            tracing::debug!(prefix, attempt, delay = ?delay, "prefix not registered yet, retrying");
            tokio::time::sleep(delay).await;
        }
        None
    }
}

/// Replace the request path with the prefix-stripped one, preserving the
/// query string. The application knows nothing about its synthetic prefix.
fn strip_prefix(parts: &mut Parts, stripped: &str) -> Result<(), ProxyError> {
    let mut uri_parts = std::mem::take(&mut parts.uri).into_parts();
    let path_and_query = match uri_parts
        .path_and_query
        .as_ref()
        .and_then(|pq| pq.query())
    {
        Some(query) => format!("{stripped}?{query}"),
        None => stripped.to_string(),
    };
    uri_parts.path_and_query = Some(
        PathAndQuery::from_str(&path_and_query)
            .map_err(|e| ProxyError::protocol(format!("invalid rewritten path: {e}")))?,
    );
    parts.uri = Uri::from_parts(uri_parts)
        .map_err(|e| ProxyError::protocol(format!("invalid rewritten uri: {e}")))?;
    Ok(())
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn stale_registration_response(prefix: &str) -> Response<Body> {
    text_response(
        StatusCode::NOT_FOUND,
        format!(
            "Couldn't find a running application for {prefix}. \
             The registration may be stale. Try reloading the page."
        ),
    )
}

fn bootstrap_response() -> Response<Body> {
    let mut response = Response::new(Body::from(BOOTSTRAP_SCRIPT));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/javascript"),
    );
    response
}
