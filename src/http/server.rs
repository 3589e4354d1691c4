//! Front server: the network face of the intercepting proxy.
//!
//! # Responsibilities
//! - Catch every request on the listener and hand it to the router
//! - Detect WebSocket upgrades on application paths, complete the native
//!   handshake and bridge frames to a virtual socket
//! - Wire up middleware (trace, whole-request timeout) and shutdown
//!
//! # Design Decisions
//! - Upgrades never reach `Router::dispatch`; they go straight to virtual
//!   socket creation, bypassing the cache policy by construction
//! - Frame bridging is frame-for-frame, no message buffering

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router as AxumRouter,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::channel::SocketData;
use crate::config::ProxyConfig;
use crate::routing::{match_app_path, Router};
use crate::websocket::{SocketEvent, VirtualSocket, CLOSE_ABNORMAL, CLOSE_NORMAL};

/// HTTP server fronting the proxy router.
pub struct ProxyServer {
    app: AxumRouter,
}

impl ProxyServer {
    pub fn new(config: &ProxyConfig, router: Arc<Router>) -> Self {
        let app = AxumRouter::new()
            .route("/{*path}", any(intercept))
            .route("/", any(intercept))
            .with_state(router)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http());
        Self { app }
    }

    /// Run the server on the given listener until ctrl-c.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "proxy server starting");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("proxy server stopped");
        Ok(())
    }
}

/// Catch-all handler: upgrades on application paths become virtual sockets,
/// everything else goes through the router pipeline.
async fn intercept(
    State(router): State<Arc<Router>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request<Body>,
) -> Response {
    if let Ok(upgrade) = ws {
        if let Some(app_path) = match_app_path(request.uri().path()) {
            return match router.open_socket(&app_path.prefix, &app_path.stripped).await {
                Ok(socket) => {
                    upgrade.on_upgrade(move |native| bridge_socket(native, socket))
                }
                Err(err) => {
                    tracing::warn!(prefix = %app_path.prefix, error = %err, "socket open failed");
                    (StatusCode::NOT_FOUND, "No application for this socket.").into_response()
                }
            };
        }
        // Upgrades outside application paths are not proxied.
        return (StatusCode::NOT_FOUND, "No socket endpoint here.").into_response();
    }

    router.dispatch(request).await
}

fn close_frame(code: Option<u16>, reason: Option<String>) -> Option<CloseFrame> {
    Some(CloseFrame {
        code: code.unwrap_or(CLOSE_NORMAL),
        reason: reason.unwrap_or_default().into(),
    })
}

/// Pump frames between a native WebSocket and a virtual socket until either
/// side closes. The worker side accepts; nothing is forwarded before the
/// open event so an early native frame cannot hit a connecting socket.
async fn bridge_socket(mut native: WebSocket, mut socket: VirtualSocket) {
    match socket.next_event().await {
        Some(SocketEvent::Open) => {}
        Some(SocketEvent::Close { code, reason }) => {
            let _ = native.send(WsMessage::Close(close_frame(code, reason))).await;
            return;
        }
        other => {
            tracing::warn!(event = ?other, "socket never opened");
            let _ = native
                .send(WsMessage::Close(close_frame(Some(CLOSE_ABNORMAL), None)))
                .await;
            return;
        }
    }

    loop {
        tokio::select! {
            event = socket.next_event() => match event {
                Some(SocketEvent::Message(SocketData::Text(text))) => {
                    if native.send(WsMessage::Text(text.into())).await.is_err() {
                        socket.close(Some(CLOSE_ABNORMAL), None);
                        break;
                    }
                }
                Some(SocketEvent::Message(SocketData::Binary(bytes))) => {
                    if native.send(WsMessage::Binary(bytes)).await.is_err() {
                        socket.close(Some(CLOSE_ABNORMAL), None);
                        break;
                    }
                }
                Some(SocketEvent::Error(report)) => {
                    tracing::warn!(%report, "virtual socket error");
                }
                Some(SocketEvent::Close { code, reason }) => {
                    let _ = native.send(WsMessage::Close(close_frame(code, reason))).await;
                    break;
                }
                Some(SocketEvent::Open) | None => break,
            },
            frame = native.recv() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = socket.send(SocketData::Text(text.as_str().to_string()));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let _ = socket.send(SocketData::Binary(bytes));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(frame.code), Some(frame.reason.as_str().to_string())),
                        None => (None, None),
                    };
                    socket.close(code, reason);
                    break;
                }
                // Ping/pong are answered by the websocket layer itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "native socket error");
                    socket.close(Some(CLOSE_ABNORMAL), None);
                    break;
                }
                None => {
                    socket.close(Some(CLOSE_ABNORMAL), None);
                    break;
                }
            },
        }
    }
}

/// Wait for shutdown signal (ctrl-c).
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}
