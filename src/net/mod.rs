//! Upstream network access for pass-through traffic.
//!
//! Application traffic never touches the network; only static assets that
//! the router classifies as pass-through are fetched here. The trait seam
//! exists so the cache policy can be exercised against a stub upstream.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::error::ProxyError;

/// The seam between the router/cache and the real network.
#[async_trait]
pub trait NetworkFetch: Send + Sync + 'static {
    async fn fetch(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError>;
}

/// Production upstream: rewrites the request authority to the configured
/// static-asset origin and forwards over a pooled hyper client.
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    scheme: Scheme,
    authority: Authority,
}

impl UpstreamClient {
    /// `origin` is the base the proxy fronts, e.g. `http://127.0.0.1:9000`.
    pub fn new(origin: &str) -> Result<Self, ProxyError> {
        let uri: Uri = origin
            .parse()
            .map_err(|e| ProxyError::Upstream(format!("invalid upstream origin: {e}")))?;
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::Upstream("upstream origin has no authority".into()))?;
        let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            client,
            scheme,
            authority,
        })
    }
}

#[async_trait]
impl NetworkFetch for UpstreamClient {
    async fn fetch(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (mut parts, body) = request.into_parts();

        let mut uri_parts = std::mem::take(&mut parts.uri).into_parts();
        uri_parts.scheme = Some(self.scheme.clone());
        uri_parts.authority = Some(self.authority.clone());
        if uri_parts.path_and_query.is_none() {
            uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        parts.uri = Uri::from_parts(uri_parts)
            .map_err(|e| ProxyError::Upstream(format!("invalid upstream uri: {e}")))?;

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}
