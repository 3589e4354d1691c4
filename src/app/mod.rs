//! Hosted-application contract and instance lifecycle.
//!
//! The in-process application runtime is a black box behind one contract:
//! given a scope and a request body stream, produce a status, headers and a
//! response body stream; and for sockets, given accept/message/close events,
//! produce accept/message/close events back. An instance is a worker task
//! consuming control messages; the proxy side reaches it only through its
//! [`AppHandle`].

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::Endpoint;
use crate::error::ProxyError;
use crate::http::codec::HttpScope;
use crate::http::serve::{buffered_body, serve_exchange};
use crate::websocket::{serve_socket, VirtualSocket, CLOSE_UNSUPPORTED_DATA};

/// A lazy byte stream, the shape of both request and response bodies.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProxyError>> + Send>>;

/// A hosted application's response: status, ordered headers and a lazy body.
pub struct AppResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: BodyStream,
}

impl AppResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Response with a fully-buffered body.
    pub fn buffered(
        status: u16,
        headers: Vec<(String, String)>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            status,
            headers,
            body: buffered_body(body.into()),
        }
    }
}

/// The contract every hosted application implements.
#[async_trait]
pub trait AppContract: Send + Sync + 'static {
    /// Handle one HTTP exchange. The body stream yields request chunks in
    /// arrival order; reading it is optional.
    async fn handle_request(
        &self,
        scope: HttpScope,
        body: BodyStream,
    ) -> Result<AppResponse, ProxyError>;

    /// Handle one socket connection. The application owns the serving side:
    /// it accepts, exchanges messages and closes. The default rejects the
    /// connection for applications that speak plain HTTP only.
    async fn handle_socket(&self, path: String, mut socket: VirtualSocket) -> Result<(), ProxyError> {
        tracing::debug!(%path, "socket connection rejected: not supported by this application");
        socket.close(
            Some(CLOSE_UNSUPPORTED_DATA),
            Some("websocket not supported".to_string()),
        );
        Ok(())
    }
}

/// Control messages an application instance consumes. `MakeRequest` and
/// `OpenSocket` each carry the worker-side endpoint of a fresh pair;
/// `Shutdown` retires the instance.
#[derive(Debug)]
pub enum ControlMessage {
    MakeRequest {
        scope: HttpScope,
        endpoint: Endpoint,
    },
    OpenSocket {
        path: String,
        endpoint: Endpoint,
    },
    Shutdown,
}

/// Reference to a live application instance: its synthetic path prefix plus
/// the sending half of its control channel. Cloneable; the instance's
/// lifecycle is owned by the worker task, never by handle holders.
#[derive(Debug, Clone)]
pub struct AppHandle {
    prefix: Arc<str>,
    control: mpsc::UnboundedSender<ControlMessage>,
}

impl AppHandle {
    /// Create a handle plus the receiving half of its control channel, for
    /// hosts that run the worker loop themselves.
    pub fn channel(prefix: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                prefix: Arc::from(prefix.into()),
                control: tx,
            },
            rx,
        )
    }

    /// The `app_<id>/` prefix this instance is reachable under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Post a control message to the instance.
    pub fn send(&self, msg: ControlMessage) -> Result<(), ProxyError> {
        self.control.send(msg).map_err(|_| ProxyError::ChannelClosed)
    }

    /// Whether the instance's worker loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    /// Ask the instance to stop consuming control messages.
    pub fn shutdown(&self) {
        let _ = self.control.send(ControlMessage::Shutdown);
    }
}

/// Generate a fresh synthetic prefix for a new instance.
pub fn fresh_prefix() -> String {
    format!("app_{}/", Uuid::new_v4().simple())
}

/// Spawn an application instance worker and return its handle.
///
/// Each HTTP exchange and each socket connection is served on its own task,
/// so concurrent exchanges to the same instance proceed fully in parallel
/// with no head-of-line blocking between them.
pub fn spawn_instance(app: Arc<dyn AppContract>, idle_timeout: Duration) -> AppHandle {
    spawn_instance_with_prefix(fresh_prefix(), app, idle_timeout)
}

/// Spawn an instance under a caller-chosen prefix.
pub fn spawn_instance_with_prefix(
    prefix: String,
    app: Arc<dyn AppContract>,
    idle_timeout: Duration,
) -> AppHandle {
    let (handle, mut control) = AppHandle::channel(prefix);
    let log_prefix = handle.prefix().to_string();
    tokio::spawn(async move {
        while let Some(msg) = control.recv().await {
            match msg {
                ControlMessage::MakeRequest { scope, endpoint } => {
                    tokio::spawn(serve_exchange(
                        endpoint,
                        scope,
                        app.clone(),
                        idle_timeout,
                    ));
                }
                ControlMessage::OpenSocket { path, endpoint } => {
                    tokio::spawn(serve_socket(endpoint, path, app.clone()));
                }
                ControlMessage::Shutdown => break,
            }
        }
        tracing::debug!(prefix = %log_prefix, "application instance stopped");
    });
    handle
}
