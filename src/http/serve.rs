//! Streaming bridge, serving side.
//!
//! Mirror image of the initiating side: reconstructs the request body from
//! incoming `http.request` events in arrival order, invokes the hosted
//! application contract, and pumps the resulting status/headers/body back as
//! `http.response.*` events terminated by `more_body = false`.
//!
//! Every channel await is bounded by an idle timeout so an abandoned
//! exchange reclaims its endpoint instead of leaking, and any application
//! error is converted into a well-formed 500 pair so the initiating side
//! never hangs waiting for a response that will never come.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};

use crate::app::{AppContract, AppResponse, BodyStream};
use crate::channel::{ChannelMessage, Endpoint, EndpointReceiver, EndpointSender};
use crate::error::ProxyError;
use crate::http::codec::HttpScope;
use crate::observability::metrics;

/// Serve one HTTP exchange on its own endpoint. Never panics; all failure
/// modes are logged and, where the protocol still allows it, reported to the
/// initiating side as a 500 response.
pub async fn serve_exchange(
    endpoint: Endpoint,
    scope: HttpScope,
    app: Arc<dyn AppContract>,
    idle_timeout: Duration,
) {
    let (tx, rx) = endpoint.split();
    let body = request_body_stream(rx, idle_timeout);
    let method = scope.method.clone();
    let path = scope.path.clone();

    match app.handle_request(scope, Box::pin(body)).await {
        Ok(response) => {
            let status = response.status;
            if let Err(err) = pump_response(&tx, response).await {
                // Typically the initiating side dropped its endpoint.
                tracing::debug!(%method, %path, error = %err, "response delivery stopped");
            }
            metrics::record_exchange(&method, status);
        }
        Err(err) => {
            tracing::error!(%method, %path, error = %err, "application handler failed");
            metrics::record_exchange(&method, 500);
            let _ = send_error_response(&tx, &err);
        }
    }
}

/// Reconstruct the request body from `http.request` events. Foreign event
/// types fail the exchange with a protocol error, a closed endpoint before
/// the terminal event fails it with `ChannelClosed`, and a quiet channel
/// past the idle timeout fails it with `IdleTimeout`.
fn request_body_stream(
    rx: EndpointReceiver,
    idle_timeout: Duration,
) -> impl futures_util::Stream<Item = Result<Bytes, ProxyError>> {
    stream::unfold(Some(rx), move |mut slot| async move {
        loop {
            let rx = slot.as_mut()?;
            match tokio::time::timeout(idle_timeout, rx.recv()).await {
                Ok(Some(ChannelMessage::HttpRequest { body, more_body })) => {
                    if !more_body {
                        slot = None;
                    }
                    match body {
                        Some(chunk) => return Some((Ok(chunk), slot)),
                        None if slot.is_none() => return None,
                        // Chunkless non-terminal event; keep reading.
                        None => {}
                    }
                }
                Ok(Some(other)) => {
                    let err = ProxyError::protocol(format!(
                        "unexpected '{}' event in request body",
                        other.kind()
                    ));
                    metrics::record_protocol_error("request_body");
                    return Some((Err(err), None));
                }
                Ok(None) => {
                    return Some((Err(ProxyError::ChannelClosed), None));
                }
                Err(_) => {
                    return Some((Err(ProxyError::IdleTimeout(idle_timeout)), None));
                }
            }
        }
    })
}

/// Send the response head, then stream body chunks, then the terminal event.
async fn pump_response(tx: &EndpointSender, response: AppResponse) -> Result<(), ProxyError> {
    tx.send(ChannelMessage::HttpResponseStart {
        status: response.status,
        headers: response.headers,
    })?;

    let mut body = response.body;
    loop {
        match body.next().await {
            Some(Ok(chunk)) => {
                tx.send(ChannelMessage::HttpResponseBody {
                    body: Some(chunk),
                    more_body: true,
                })?;
            }
            Some(Err(err)) => {
                // The head is already on the wire; all that is left is to
                // terminate the body so the peer does not wait forever.
                tracing::warn!(error = %err, "application body failed mid-stream");
                tx.send(ChannelMessage::HttpResponseBody {
                    body: None,
                    more_body: false,
                })?;
                return Ok(());
            }
            None => {
                tx.send(ChannelMessage::HttpResponseBody {
                    body: None,
                    more_body: false,
                })?;
                return Ok(());
            }
        }
    }
}

/// Convert an application failure into a complete 500 exchange.
fn send_error_response(tx: &EndpointSender, err: &ProxyError) -> Result<(), ProxyError> {
    tx.send(ChannelMessage::HttpResponseStart {
        status: 500,
        headers: vec![(
            "content-type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        )],
    })?;
    tx.send(ChannelMessage::HttpResponseBody {
        body: Some(Bytes::from(format!("Application error: {err}"))),
        more_body: true,
    })?;
    tx.send(ChannelMessage::HttpResponseBody {
        body: None,
        more_body: false,
    })
}

/// Shared helper for building a [`BodyStream`] from a single buffered chunk.
pub(crate) fn buffered_body(bytes: Bytes) -> BodyStream {
    if bytes.is_empty() {
        Box::pin(stream::empty())
    } else {
        Box::pin(stream::once(async move { Ok(bytes) }))
    }
}
