//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use bytes::Bytes;
use futures_util::StreamExt;

use sandproxy::app::{AppContract, AppResponse, BodyStream};
use sandproxy::cache::AssetCache;
use sandproxy::channel::SocketData;
use sandproxy::config::CacheConfig;
use sandproxy::error::ProxyError;
use sandproxy::http::HttpScope;
use sandproxy::net::NetworkFetch;
use sandproxy::routing::{AppRegistry, Router, RouterSettings};
use sandproxy::websocket::{SocketEvent, VirtualSocket};

pub const HTML_PAGE: &str =
    "<html><head><title>test app</title></head><body>app body</body></html>";

/// Test application: an HTML root, a JSON endpoint, a streaming echo, a
/// handler that never returns, and an echoing socket.
pub struct TestApp;

#[async_trait]
impl AppContract for TestApp {
    async fn handle_request(
        &self,
        scope: HttpScope,
        mut body: BodyStream,
    ) -> Result<AppResponse, ProxyError> {
        match scope.path.as_str() {
            "/" | "/nested/index.html" => Ok(AppResponse::buffered(
                200,
                vec![("content-type".into(), "text/html; charset=utf-8".into())],
                HTML_PAGE,
            )),
            "/api/json" => Ok(AppResponse::buffered(
                200,
                vec![("content-type".into(), "application/json".into())],
                "{\"ok\":true}",
            )),
            "/echo" => {
                let mut echoed = Vec::new();
                while let Some(chunk) = body.next().await {
                    echoed.extend_from_slice(&chunk?);
                }
                Ok(AppResponse::buffered(
                    200,
                    vec![("content-type".into(), "application/octet-stream".into())],
                    echoed,
                ))
            }
            "/hang" => std::future::pending().await,
            _ => Ok(AppResponse::buffered(
                404,
                vec![("content-type".into(), "text/plain".into())],
                "not found",
            )),
        }
    }

    async fn handle_socket(
        &self,
        _path: String,
        mut socket: VirtualSocket,
    ) -> Result<(), ProxyError> {
        socket.accept();
        while let Some(event) = socket.next_event().await {
            match event {
                SocketEvent::Message(SocketData::Text(text)) => {
                    socket.send(SocketData::Text(format!("echo: {text}")))?;
                }
                SocketEvent::Message(SocketData::Binary(bytes)) => {
                    socket.send(SocketData::Binary(bytes))?;
                }
                SocketEvent::Close { .. } => break,
                SocketEvent::Open | SocketEvent::Error(_) => {}
            }
        }
        Ok(())
    }
}

/// Stub upstream echoing the request path, for pass-through assertions.
pub struct StaticUpstream;

#[async_trait]
impl NetworkFetch for StaticUpstream {
    async fn fetch(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        Ok(Response::new(Body::from(format!(
            "upstream:{}",
            request.uri().path()
        ))))
    }
}

/// Router with a short lookup window so stale-prefix tests stay quick.
pub fn test_router() -> Arc<Router> {
    let settings = RouterSettings {
        lookup_attempts: 5,
        lookup_base_delay_ms: 10,
        lookup_max_delay_ms: 80,
        idle_timeout: Duration::from_secs(5),
        script_path: "/sandproxy-bootstrap.js".to_string(),
    };
    Arc::new(Router::new(
        Arc::new(AppRegistry::new()),
        Arc::new(AssetCache::new(&CacheConfig::default())),
        Arc::new(StaticUpstream),
        settings,
    ))
}

/// Collect a response body into one buffer.
pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}
