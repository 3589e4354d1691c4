//! Channel Endpoint: the sole cross-context primitive.
//!
//! # Responsibilities
//! - Provide an exclusively-owned, two-directional, ordered message pipe
//!   between exactly two holders (proxy side and worker side)
//! - Define the control message shapes exchanged over a pipe
//! - Make endpoint closure observable on the peer
//!
//! # Design Decisions
//! - Two cross-wired unbounded mpsc channels: sends never block (mirroring
//!   `postMessage`) and per-pair ordering is guaranteed by the transport
//! - Endpoints are not `Clone`; ownership transfers once at creation and an
//!   endpoint is never shared between two logical exchanges
//! - Dropping either half of an endpoint is the terminal close for the pair

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::ProxyError;

/// Payload of a virtual socket `message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketData {
    Text(String),
    Binary(Bytes),
}

/// Messages exchanged over a channel endpoint.
///
/// The HTTP variants follow the scope/chunk protocol: exactly one
/// `HttpResponseStart` precedes all `HttpResponseBody` events, and the final
/// body event in either direction carries `more_body = false`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// A request body chunk; `more_body = false` terminates the request.
    HttpRequest {
        body: Option<Bytes>,
        more_body: bool,
    },
    /// Response status and headers; resolves the initiating side immediately.
    HttpResponseStart {
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// A response body chunk; `more_body = false` closes the body stream.
    HttpResponseBody {
        body: Option<Bytes>,
        more_body: bool,
    },
    /// Socket accept: the serving side tells the connecting side it is open.
    Open,
    /// Socket payload; only valid while the connection is open.
    Message { data: SocketData },
    /// Socket close with optional code and reason. Never acknowledged.
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl ChannelMessage {
    /// Wire-level name of the message, used in protocol-violation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::HttpRequest { .. } => "http.request",
            ChannelMessage::HttpResponseStart { .. } => "http.response.start",
            ChannelMessage::HttpResponseBody { .. } => "http.response.body",
            ChannelMessage::Open => "open",
            ChannelMessage::Message { .. } => "message",
            ChannelMessage::Close { .. } => "close",
        }
    }
}

/// One side of a channel pair. Holds both directions; [`Endpoint::split`]
/// separates them when sending and receiving proceed concurrently.
#[derive(Debug)]
pub struct Endpoint {
    tx: EndpointSender,
    rx: EndpointReceiver,
}

/// Sending half of an endpoint.
#[derive(Debug)]
pub struct EndpointSender {
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

/// Receiving half of an endpoint.
#[derive(Debug)]
pub struct EndpointReceiver {
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
}

/// Allocate a fresh endpoint pair. One end is handed to each side and the
/// pair is retired when either side drops its endpoint.
pub fn endpoint_pair() -> (Endpoint, Endpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Endpoint {
            tx: EndpointSender { tx: a_tx },
            rx: EndpointReceiver { rx: b_rx },
        },
        Endpoint {
            tx: EndpointSender { tx: b_tx },
            rx: EndpointReceiver { rx: a_rx },
        },
    )
}

impl Endpoint {
    /// Send a message to the peer.
    pub fn send(&self, msg: ChannelMessage) -> Result<(), ProxyError> {
        self.tx.send(msg)
    }

    /// Receive the next message, or `None` once the peer has closed.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }

    /// Split into independently-owned halves.
    pub fn split(self) -> (EndpointSender, EndpointReceiver) {
        (self.tx, self.rx)
    }
}

impl EndpointSender {
    /// Send a message to the peer. Fails once the peer endpoint is gone.
    pub fn send(&self, msg: ChannelMessage) -> Result<(), ProxyError> {
        self.tx.send(msg).map_err(|_| ProxyError::ChannelClosed)
    }

    /// Whether the peer has dropped its receiving half.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EndpointReceiver {
    /// Receive the next message, or `None` once the peer has closed.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_send_order() {
        let (a, mut b) = endpoint_pair();
        for i in 0..4u16 {
            a.send(ChannelMessage::HttpResponseStart {
                status: 200 + i,
                headers: vec![],
            })
            .unwrap();
        }
        for i in 0..4u16 {
            match b.recv().await.unwrap() {
                ChannelMessage::HttpResponseStart { status, .. } => {
                    assert_eq!(status, 200 + i)
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn both_directions_are_independent() {
        let (a, b) = endpoint_pair();
        a.send(ChannelMessage::Open).unwrap();
        b.send(ChannelMessage::Close {
            code: Some(1000),
            reason: None,
        })
        .unwrap();

        let (_, mut a_rx) = a.split();
        let (_, mut b_rx) = b.split();
        assert!(matches!(
            b_rx.recv().await,
            Some(ChannelMessage::Open)
        ));
        assert!(matches!(
            a_rx.recv().await,
            Some(ChannelMessage::Close { .. })
        ));
    }

    #[tokio::test]
    async fn drop_is_terminal() {
        let (a, mut b) = endpoint_pair();
        drop(a);
        assert!(b.recv().await.is_none());
        assert!(matches!(
            b.send(ChannelMessage::Open),
            Err(ProxyError::ChannelClosed)
        ));
    }
}
