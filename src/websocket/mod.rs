//! WebSocket emulation over a channel endpoint.
//!
//! # Responsibilities
//! - Present a WebSocket-shaped API (`accept`/`send`/`close`/events) backed
//!   by a persistent channel endpoint instead of a network socket
//! - Enforce the connection state machine on both ends of the pair
//! - Turn out-of-protocol events into an error plus a 1002 close, never a
//!   crash of the surrounding task
//!
//! # Design Decisions
//! - Explicit finite-state machine with a fixed transition table rather than
//!   dynamic event-listener dispatch; events are pulled with `next_event()`
//! - `close` is unacknowledged: the local state moves straight to `Closed`
//!   and the peer observes the close event exactly once
//! - Messages arriving after a local close are discarded, not delivered

use std::sync::Arc;

use crate::app::AppContract;
use crate::channel::{ChannelMessage, Endpoint, EndpointReceiver, EndpointSender, SocketData};
use crate::error::ProxyError;
use crate::observability::metrics;

/// Close code sent when an endpoint violates the socket protocol.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Close code for a normal, deliberate close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for data the receiver cannot accept (for example a socket
/// connection to an application that only speaks HTTP).
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
/// Close code observed when the peer vanished without a close event.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Connection states, mirrored on both ends of one endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events surfaced to the holder of a [`VirtualSocket`].
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// The accepting side opened the connection.
    Open,
    /// A data frame, delivered only while locally open.
    Message(SocketData),
    /// A local protocol or transport error. Followed by a close event.
    Error(String),
    /// The connection closed, with the code/reason carried on the wire.
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// A bidirectional virtual socket over one exclusively-owned endpoint.
///
/// Either end of the pair may hold one; the serving side calls [`accept`]
/// after creation, the connecting side waits for [`SocketEvent::Open`].
///
/// [`accept`]: VirtualSocket::accept
#[derive(Debug)]
pub struct VirtualSocket {
    state: SocketState,
    tx: EndpointSender,
    rx: EndpointReceiver,
    /// Locally-dispatched event queued for the next `next_event` call.
    pending: Option<SocketEvent>,
}

impl VirtualSocket {
    /// Wrap an endpoint in a socket. Starts in `Connecting` on both ends.
    pub fn new(endpoint: Endpoint) -> Self {
        let (tx, rx) = endpoint.split();
        Self {
            state: SocketState::Connecting,
            tx,
            rx,
            pending: None,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Accept the connection. Called by the serving side; tells the peer the
    /// connection is established. No-op outside `Connecting`.
    pub fn accept(&mut self) {
        if self.state != SocketState::Connecting {
            return;
        }
        self.state = SocketState::Open;
        if self.tx.send(ChannelMessage::Open).is_err() {
            self.transport_lost();
        }
    }

    /// Transmit a data frame.
    ///
    /// Fails with an invalid-state error while `Connecting` (nothing is
    /// transmitted); is silently ignored once closing or closed, since there
    /// is no receiver anymore.
    pub fn send(&mut self, data: SocketData) -> Result<(), ProxyError> {
        match self.state {
            SocketState::Connecting => Err(ProxyError::InvalidSocketState(
                "cannot send while the socket is connecting",
            )),
            SocketState::Closing | SocketState::Closed => Ok(()),
            SocketState::Open => {
                if self.tx.send(ChannelMessage::Message { data }).is_err() {
                    self.transport_lost();
                }
                Ok(())
            }
        }
    }

    /// Close the connection. Sends the close event, moves the local state
    /// straight to `Closed` (close is not acknowledged) and queues a local
    /// close event. No-op if already closing or closed.
    pub fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        if matches!(self.state, SocketState::Closing | SocketState::Closed) {
            return;
        }
        self.state = SocketState::Closing;
        let _ = self.tx.send(ChannelMessage::Close {
            code,
            reason: reason.clone(),
        });
        self.state = SocketState::Closed;
        self.pending = Some(SocketEvent::Close { code, reason });
        metrics::record_socket_event("close");
    }

    /// Pull the next event. Returns `None` once the socket has reached
    /// `Closed` and the final close event has been delivered.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }
        // After a local close there is no receiver: anything still in
        // flight from the peer is discarded, not delivered.
        if self.state == SocketState::Closed {
            return None;
        }

        let message = match self.rx.recv().await {
            Some(message) => message,
            None => {
                // Peer endpoint vanished without a close event.
                self.state = SocketState::Closed;
                self.pending = Some(SocketEvent::Close {
                    code: Some(CLOSE_ABNORMAL),
                    reason: None,
                });
                return Some(SocketEvent::Error(
                    "channel closed without a close event".to_string(),
                ));
            }
        };

        match (message, self.state) {
            (ChannelMessage::Open, SocketState::Connecting) => {
                self.state = SocketState::Open;
                metrics::record_socket_event("open");
                Some(SocketEvent::Open)
            }
            (ChannelMessage::Message { data }, SocketState::Open) => {
                Some(SocketEvent::Message(data))
            }
            (ChannelMessage::Close { code, reason }, _) => {
                // Straight to Closed from any pre-terminal state.
                self.state = SocketState::Closed;
                metrics::record_socket_event("close");
                Some(SocketEvent::Close { code, reason })
            }
            (message, state) => {
                let report = format!(
                    "unexpected '{}' event while socket is {:?}",
                    message.kind(),
                    state
                );
                tracing::warn!(event = message.kind(), state = ?state, "socket protocol error");
                metrics::record_protocol_error("socket");
                self.close(Some(CLOSE_PROTOCOL_ERROR), Some(report.clone()));
                Some(SocketEvent::Error(report))
            }
        }
    }

    fn transport_lost(&mut self) {
        tracing::debug!("socket transport lost; marking closed");
        self.state = SocketState::Closed;
        self.pending = Some(SocketEvent::Close {
            code: Some(CLOSE_ABNORMAL),
            reason: None,
        });
    }
}

/// Worker-side entry point for one socket connection: wraps the endpoint in
/// a serving-role socket and hands it to the application contract. Contract
/// failures close the pair with the distinguished protocol-error code.
pub async fn serve_socket(endpoint: Endpoint, path: String, app: Arc<dyn AppContract>) {
    let socket = VirtualSocket::new(endpoint);
    if let Err(err) = app.handle_socket(path.clone(), socket).await {
        tracing::error!(%path, error = %err, "application socket handler failed");
    }
}
