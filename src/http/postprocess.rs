//! Response post-processing.
//!
//! Two independent, composable transforms applied to fully-formed responses:
//! cross-origin-isolation header injection (opt-in per request) and HTML
//! head injection of the client bootstrap script. Both are no-ops when their
//! precondition does not hold and never fail a response.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, REFERER};
use axum::http::{request::Parts, Response};
use bytes::Bytes;

use super::codec::ResponseHead;

/// A per-chunk response body transform, run before a chunk becomes visible
/// to the consumer. The head is available so filters can inspect status and
/// content type.
pub type BodyFilter = Arc<dyn Fn(Bytes, &ResponseHead) -> Bytes + Send + Sync>;

/// The client bootstrap script served from memory at the configured script
/// path and injected into application root documents. It replaces the hosted
/// page's socket constructor with one backed by a channel to the worker.
pub const BOOTSTRAP_SCRIPT: &str = include_str!("bootstrap.js");

const ISOLATION_HEADERS: [(&str, &str); 3] = [
    ("cross-origin-embedder-policy", "credentialless"),
    ("cross-origin-resource-policy", "cross-origin"),
    ("cross-origin-opener-policy", "same-origin"),
];

/// Whether the request opted into cross-origin isolation, either via a
/// `coi=1` query flag or a referrer that carries one.
pub fn coi_requested(parts: &Parts) -> bool {
    let in_query = parts
        .uri
        .query()
        .map(|q| q.split('&').any(|pair| pair == "coi=1"))
        .unwrap_or(false);
    let in_referrer = parts
        .headers
        .get(REFERER)
        .and_then(|v| v.to_str().ok())
        .map(|r| r.contains("coi=1"))
        .unwrap_or(false);
    in_query || in_referrer
}

/// Set the fixed header triplet required for cross-origin isolation.
/// Existing values are replaced; the body passes through untouched.
pub fn add_isolation_headers(mut response: Response<Body>) -> Response<Body> {
    let headers = response.headers_mut();
    for (name, value) in ISOLATION_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

fn is_html(head: &ResponseHead) -> bool {
    match head.content_type() {
        Some(ct) => {
            ct.strip_prefix("text/html")
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(';'))
        }
        None => false,
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Build the filter that splices a `<script>` include in front of `</head>`
/// in `text/html` response bodies.
///
/// The substitution is a raw byte splice on each chunk, preserving streaming
/// and avoiding full-document buffering. Known limitation, kept deliberately:
/// if `</head>` spans a chunk boundary the substitution does not fire and no
/// script is injected.
pub fn inject_script_filter(script_src: &str) -> BodyFilter {
    let tag = format!(
        "<script src=\"{script_src}\" type=\"module\"></script>\n</head>"
    );
    Arc::new(move |chunk: Bytes, head: &ResponseHead| {
        if !is_html(head) {
            return chunk;
        }
        match find_subsequence(&chunk, b"</head>") {
            Some(at) => {
                let mut rewritten = Vec::with_capacity(chunk.len() + tag.len());
                rewritten.extend_from_slice(&chunk[..at]);
                rewritten.extend_from_slice(tag.as_bytes());
                rewritten.extend_from_slice(&chunk[at + b"</head>".len()..]);
                Bytes::from(rewritten)
            }
            None => chunk,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::codec::response_head;
    use axum::http::Request;

    fn html_head() -> ResponseHead {
        response_head(200, &[("content-type".into(), "text/html".into())])
    }

    #[test]
    fn injects_before_closing_head() {
        let filter = inject_script_filter("/sandproxy-bootstrap.js");
        let body = Bytes::from_static(b"<html><head></head><body></body></html>");
        let out = filter(body, &html_head());
        let out = String::from_utf8(out.to_vec()).unwrap();
        assert_eq!(
            out,
            "<html><head><script src=\"/sandproxy-bootstrap.js\" type=\"module\"></script>\n</head><body></body></html>"
        );
    }

    #[test]
    fn matches_content_type_with_charset() {
        let head = response_head(
            200,
            &[("content-type".into(), "text/html; charset=utf-8".into())],
        );
        let filter = inject_script_filter("/b.js");
        let out = filter(Bytes::from_static(b"<head></head>"), &head);
        assert!(out.starts_with(b"<head><script"));
    }

    #[test]
    fn leaves_non_html_untouched() {
        let head = response_head(200, &[("content-type".into(), "text/htmlish".into())]);
        let filter = inject_script_filter("/b.js");
        let body = Bytes::from_static(b"</head>");
        assert_eq!(filter(body.clone(), &head), body);

        let json = response_head(200, &[("content-type".into(), "application/json".into())]);
        assert_eq!(filter(body.clone(), &json), body);
    }

    #[test]
    fn tag_split_across_chunks_is_not_rewritten() {
        // Documented limitation: the splice is per-chunk, so a closing tag
        // that straddles a boundary passes through unmodified.
        let filter = inject_script_filter("/b.js");
        let first = filter(Bytes::from_static(b"<head></he"), &html_head());
        let second = filter(Bytes::from_static(b"ad><body>"), &html_head());
        assert_eq!(first, Bytes::from_static(b"<head></he"));
        assert_eq!(second, Bytes::from_static(b"ad><body>"));
    }

    #[test]
    fn isolation_headers_are_a_fixed_triplet() {
        let response = Response::new(Body::empty());
        let response = add_isolation_headers(response);
        let headers = response.headers();
        assert_eq!(
            headers.get("cross-origin-embedder-policy").unwrap(),
            "credentialless"
        );
        assert_eq!(
            headers.get("cross-origin-resource-policy").unwrap(),
            "cross-origin"
        );
        assert_eq!(
            headers.get("cross-origin-opener-policy").unwrap(),
            "same-origin"
        );
    }

    #[test]
    fn coi_flag_detected_in_query_and_referrer() {
        let (with_query, _) = Request::builder()
            .uri("/app_x/?coi=1")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        assert!(coi_requested(&with_query));

        let (with_referrer, _) = Request::builder()
            .uri("/app_x/style.css")
            .header("referer", "http://localhost/app_x/?coi=1")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        assert!(coi_requested(&with_referrer));

        let (plain, _) = Request::builder()
            .uri("/app_x/?coi=0")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        assert!(!coi_requested(&plain));
    }
}
