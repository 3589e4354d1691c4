//! Sandproxy binary: boots the proxy with a demo application instance.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use futures_util::StreamExt;
use tokio::net::TcpListener;

use sandproxy::app::{AppContract, AppResponse, BodyStream};
use sandproxy::cache::AssetCache;
use sandproxy::channel::SocketData;
use sandproxy::config::{load_config, ProxyConfig};
use sandproxy::error::ProxyError;
use sandproxy::http::{HttpScope, ProxyServer};
use sandproxy::net::UpstreamClient;
use sandproxy::observability::logging;
use sandproxy::routing::{AppRegistry, Router, RouterSettings};
use sandproxy::websocket::{SocketEvent, VirtualSocket};

#[derive(Parser, Debug)]
#[command(name = "sandproxy", about = "Intercepting proxy for sandboxed application workers")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(long)]
    listen: Option<String>,
}

/// Demo application served under a synthetic prefix at startup: a root
/// document (with a head for the bootstrap script to land in), a JSON
/// endpoint, a body echo and an echoing socket.
struct DemoApp;

const DEMO_PAGE: &str = "<html><head><title>sandproxy demo</title></head>\
<body><h1>Hello from a sandboxed worker</h1></body></html>";

#[async_trait]
impl AppContract for DemoApp {
    async fn handle_request(
        &self,
        scope: HttpScope,
        mut body: BodyStream,
    ) -> Result<AppResponse, ProxyError> {
        match (scope.method.as_str(), scope.path.as_str()) {
            (_, "/") => Ok(AppResponse::buffered(
                200,
                vec![("content-type".into(), "text/html; charset=utf-8".into())],
                DEMO_PAGE,
            )),
            ("GET", "/api/info") => {
                let info = serde_json::json!({
                    "app": "demo",
                    "query": scope.query_string,
                });
                Ok(AppResponse::buffered(
                    200,
                    vec![("content-type".into(), "application/json".into())],
                    info.to_string(),
                ))
            }
            ("POST", "/echo") => {
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
            _ => Ok(AppResponse::buffered(
                404,
                vec![("content-type".into(), "text/plain".into())],
                "not found",
            )),
        }
    }

    async fn handle_socket(
        &self,
        path: String,
        mut socket: VirtualSocket,
    ) -> Result<(), ProxyError> {
        tracing::info!(%path, "demo socket connected");
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listener.bind_address = listen;
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache_enabled = config.cache.enabled,
        "configuration loaded"
    );

    let registry = Arc::new(AppRegistry::new());
    let cache = Arc::new(AssetCache::new(&config.cache));
    let upstream = Arc::new(UpstreamClient::new(&config.upstream.origin)?);
    let router = Arc::new(Router::new(
        registry,
        cache,
        upstream,
        RouterSettings::from_config(&config),
    ));

    let handle = router.launch(Arc::new(DemoApp));
    tracing::info!(
        url = %format!("http://{}/{}", config.listener.bind_address, handle.prefix()),
        "demo application registered"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    ProxyServer::new(&config, router).run(listener).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
