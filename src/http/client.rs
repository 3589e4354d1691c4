//! Streaming bridge, initiating side.
//!
//! # Responsibilities
//! - Allocate a fresh channel endpoint per HTTP exchange
//! - Hand the scope and one endpoint to the application instance
//! - Pump the request body across as `http.request` chunk events
//! - Resolve a `Response` as soon as `http.response.start` arrives, with a
//!   body stream fed incrementally from `http.response.body` events
//!
//! # Design Decisions
//! - The response is available the moment headers are known; callers can
//!   consume the body before it has fully arrived
//! - Empty request bodies take a fast path: the single terminal event is
//!   sent without ever polling a body reader
//! - Dropping the returned response body drops the endpoint, which is how
//!   the serving side observes an abandoned exchange

use axum::body::Body;
use axum::http::{Method, Request, Response};
use futures_util::{stream, StreamExt};
use hyper::body::Body as _;

use crate::app::{AppHandle, ControlMessage};
use crate::channel::{endpoint_pair, ChannelMessage, EndpointReceiver, EndpointSender};
use crate::error::ProxyError;
use crate::http::codec::{self, ResponseHead};
use crate::http::postprocess::BodyFilter;

/// Drive one HTTP request against an application instance.
///
/// `filter`, when present, runs on every response body chunk before the
/// chunk is made visible to the consumer; this is the injection point for
/// HTML rewriting.
pub async fn fetch_app(
    handle: &AppHandle,
    request: Request<Body>,
    filter: Option<BodyFilter>,
) -> Result<Response<Body>, ProxyError> {
    let (parts, body) = request.into_parts();
    let scope = codec::to_scope(&parts);

    let (ours, theirs) = endpoint_pair();
    handle.send(ControlMessage::MakeRequest {
        scope,
        endpoint: theirs,
    })?;
    let (tx, mut rx) = ours.split();

    // Requests without a body never register a reader; GET/HEAD bodies are
    // dropped outright, matching what a network layer would have done.
    let force_empty = parts.method == Method::GET || parts.method == Method::HEAD;
    if force_empty || body.size_hint().exact() == Some(0) {
        tx.send(ChannelMessage::HttpRequest {
            body: None,
            more_body: false,
        })?;
    } else {
        tokio::spawn(pump_request_body(tx, body));
    }

    // The first event on the endpoint must be the response head.
    let (status, headers) = match rx.recv().await {
        Some(ChannelMessage::HttpResponseStart { status, headers }) => (status, headers),
        Some(other) => {
            return Err(ProxyError::protocol(format!(
                "expected http.response.start, got '{}'",
                other.kind()
            )))
        }
        None => return Err(ProxyError::ChannelClosed),
    };

    let head = codec::response_head(status, &headers);
    let body = Body::from_stream(response_body_stream(rx, head.clone(), filter));
    Ok(codec::from_response_head(&head, body))
}

/// Forward the request body chunk by chunk, then send the terminal event.
async fn pump_request_body(tx: EndpointSender, body: Body) {
    let mut chunks = body.into_data_stream();
    loop {
        match chunks.next().await {
            Some(Ok(chunk)) => {
                if tx
                    .send(ChannelMessage::HttpRequest {
                        body: Some(chunk),
                        more_body: true,
                    })
                    .is_err()
                {
                    // Serving side is gone; nothing left to feed.
                    return;
                }
            }
            Some(Err(err)) => {
                tracing::debug!(error = %err, "request body aborted mid-stream");
                let _ = tx.send(ChannelMessage::HttpRequest {
                    body: None,
                    more_body: false,
                });
                return;
            }
            None => {
                let _ = tx.send(ChannelMessage::HttpRequest {
                    body: None,
                    more_body: false,
                });
                return;
            }
        }
    }
}

struct ResponseBodyState {
    rx: Option<EndpointReceiver>,
    head: ResponseHead,
    filter: Option<BodyFilter>,
}

/// Lazy response body: yields filtered chunks as `http.response.body` events
/// arrive, ends on `more_body = false`, and fails the stream on anything
/// out of protocol. Dropping the stream releases the endpoint.
fn response_body_stream(
    rx: EndpointReceiver,
    head: ResponseHead,
    filter: Option<BodyFilter>,
) -> impl futures_util::Stream<Item = Result<bytes::Bytes, ProxyError>> {
    stream::unfold(
        ResponseBodyState {
            rx: Some(rx),
            head,
            filter,
        },
        |mut state| async move {
            loop {
                let rx = state.rx.as_mut()?;
                match rx.recv().await {
                    Some(ChannelMessage::HttpResponseBody { body, more_body }) => {
                        if !more_body {
                            state.rx = None;
                        }
                        match body {
                            Some(raw) => {
                                let chunk = match &state.filter {
                                    Some(f) => f(raw, &state.head),
                                    None => raw,
                                };
                                return Some((Ok(chunk), state));
                            }
                            None if state.rx.is_none() => return None,
                            // Chunkless non-terminal event; keep waiting.
                            None => {}
                        }
                    }
                    Some(other) => {
                        state.rx = None;
                        return Some((
                            Err(ProxyError::protocol(format!(
                                "unexpected '{}' event in response body",
                                other.kind()
                            ))),
                            state,
                        ));
                    }
                    None => {
                        state.rx = None;
                        return Some((Err(ProxyError::ChannelClosed), state));
                    }
                }
            }
        },
    )
}
