//! Request/Response Codec.
//!
//! Pure conversions between platform HTTP types and the scope/chunk protocol:
//! a request becomes an immutable [`HttpScope`], and a received response head
//! plus a lazy body stream becomes a platform `Response`. No state, and no
//! failure path surfaces to callers.

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::{request::Parts, Response, StatusCode};
use percent_encoding::percent_decode_str;

/// Protocol identifier version carried in every scope.
pub const PROTOCOL_VERSION: &str = "3.0";
/// Spec version carried in every scope.
pub const SPEC_VERSION: &str = "2.1";
/// HTTP version the message-based transport emulates.
pub const HTTP_VERSION: &str = "1.1";

/// Whether a scope describes a plain HTTP exchange or a socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Http,
    WebSocket,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Http => "http",
            ScopeKind::WebSocket => "websocket",
        }
    }
}

/// Immutable description of one HTTP request, created once per exchange by
/// [`to_scope`] and owned by the streaming bridge for the exchange lifetime.
///
/// The path is percent-decoded here, exactly once; downstream consumers must
/// not decode again. The query string is carried raw.
#[derive(Debug, Clone)]
pub struct HttpScope {
    pub kind: ScopeKind,
    /// Protocol identifier version, fixed per transport revision.
    pub protocol_version: &'static str,
    /// Version of the scope/chunk message contract.
    pub spec_version: &'static str,
    /// HTTP version the transport emulates.
    pub http_version: &'static str,
    pub method: String,
    pub scheme: String,
    pub path: String,
    pub query_string: String,
    pub root_path: String,
    /// Ordered (name, value) pairs, preserved as received.
    pub headers: Vec<(String, String)>,
}

/// Build the scope record for a request. Total over any request with a
/// method, URI and header set.
pub fn to_scope(parts: &Parts) -> HttpScope {
    let path = percent_decode_str(parts.uri.path())
        .decode_utf8_lossy()
        .into_owned();
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    HttpScope {
        kind: ScopeKind::Http,
        protocol_version: PROTOCOL_VERSION,
        spec_version: SPEC_VERSION,
        http_version: HTTP_VERSION,
        method: parts.method.as_str().to_string(),
        scheme: parts.uri.scheme_str().unwrap_or("http").to_string(),
        path,
        query_string: parts.uri.query().unwrap_or("").to_string(),
        root_path: String::new(),
        headers,
    }
}

/// Status and headers of a response, available to body filters before the
/// body has finished streaming.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// The `content-type` header value, if present and readable.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Assemble a [`ResponseHead`] from protocol status/header pairs. Header
/// pairs that are not representable are skipped rather than failing the
/// exchange; the hosted application produced them, not the transport.
pub fn response_head(status: u16, headers: &[(String, String)]) -> ResponseHead {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => {
                tracing::warn!(header = %name, "skipping unrepresentable response header");
            }
        }
    }
    ResponseHead {
        status,
        headers: map,
    }
}

/// Reconstruct a platform response from a head and a lazy body. The body is
/// single-consumption, matching the one-shot nature of an HTTP response body.
pub fn from_response_head(head: &ResponseHead, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = head.status;
    *response.headers_mut() = head.headers.clone();
    response
}
