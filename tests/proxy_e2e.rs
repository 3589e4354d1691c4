//! End-to-end scenarios through the router: registration races, injection,
//! isolation headers, pass-through traffic and virtual sockets.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;

use sandproxy::app::spawn_instance_with_prefix;
use sandproxy::channel::SocketData;
use sandproxy::websocket::{SocketEvent, CLOSE_NORMAL};

mod common;

use common::{body_bytes, test_router, TestApp};

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn registration_arriving_late_is_absorbed_by_retry() {
    let router = test_router();
    let handle =
        spawn_instance_with_prefix("app_race/".into(), Arc::new(TestApp), Duration::from_secs(5));

    // The request races ahead of the registration by a few milliseconds.
    {
        let router = router.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            router.registry().register("app_race/", handle);
        });
    }

    let response = router.dispatch(get("/app_race/api/json")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unregistered_prefix_is_a_bounded_404() {
    let router = test_router();

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        router.dispatch(get("/app_nobody/")),
    )
    .await
    .expect("lookup must give up within its retry budget");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_bytes(response).await;
    assert!(std::str::from_utf8(&body).unwrap().contains("may be stale"));
}

#[tokio::test]
async fn root_document_gets_the_bootstrap_script() {
    let router = test_router();
    let handle = router.launch(Arc::new(TestApp));
    let prefix = handle.prefix().to_string();

    let response = router.dispatch(get(&format!("/{prefix}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(body.contains(
        "<script src=\"/sandproxy-bootstrap.js\" type=\"module\"></script>\n</head>"
    ));

    // Non-root documents pass through untouched.
    let response = router
        .dispatch(get(&format!("/{prefix}nested/index.html")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(!body.contains("sandproxy-bootstrap.js"));
}

#[tokio::test]
async fn isolation_headers_require_the_optin_flag() {
    let router = test_router();
    let handle = router.launch(Arc::new(TestApp));
    let prefix = handle.prefix().to_string();

    let plain = router.dispatch(get(&format!("/{prefix}api/json"))).await;
    assert!(plain.headers().get("cross-origin-embedder-policy").is_none());

    let isolated = router
        .dispatch(get(&format!("/{prefix}api/json?coi=1")))
        .await;
    assert_eq!(
        isolated.headers()["cross-origin-embedder-policy"],
        "credentialless"
    );
    assert_eq!(
        isolated.headers()["cross-origin-opener-policy"],
        "same-origin"
    );
    assert_eq!(
        isolated.headers()["cross-origin-resource-policy"],
        "cross-origin"
    );
}

#[tokio::test]
async fn bootstrap_script_is_served_from_memory() {
    let router = test_router();
    let response = router.dispatch(get("/sandproxy-bootstrap.js")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/javascript");
    assert!(!body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn hung_exchange_does_not_block_concurrent_ones() {
    let router = test_router();
    let handle = router.launch(Arc::new(TestApp));
    let prefix = handle.prefix().to_string();

    let hang = {
        let router = router.clone();
        let uri = format!("/{prefix}hang");
        tokio::spawn(async move { router.dispatch(get(&uri)).await })
    };

    // A second exchange to the same instance must complete while the first
    // is stuck in its handler.
    let response = tokio::time::timeout(
        Duration::from_secs(1),
        router.dispatch(get(&format!("/{prefix}api/json"))),
    )
    .await
    .expect("concurrent exchange must not be blocked");
    assert_eq!(response.status(), StatusCode::OK);

    hang.abort();
}

#[tokio::test]
async fn unmatched_paths_go_to_the_upstream() {
    let router = test_router();
    let response = router.dispatch(get("/index.html")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_bytes(response).await,
        Bytes::from("upstream:/index.html")
    );
}

#[tokio::test]
async fn retired_instances_stop_receiving_traffic() {
    let router = test_router();
    let handle = router.launch(Arc::new(TestApp));
    let prefix = handle.prefix().to_string();

    let response = router.dispatch(get(&format!("/{prefix}api/json"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    router.retire(&prefix);
    let response = router.dispatch(get(&format!("/{prefix}api/json"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn virtual_socket_echoes_and_closes_once() {
    let router = test_router();
    let handle = router.launch(Arc::new(TestApp));
    let prefix = handle.prefix().to_string();

    let mut socket = router.open_socket(&prefix, "/").await.unwrap();
    assert_eq!(socket.next_event().await, Some(SocketEvent::Open));

    socket.send(SocketData::Text("hi".into())).unwrap();
    assert_eq!(
        socket.next_event().await,
        Some(SocketEvent::Message(SocketData::Text("echo: hi".into())))
    );

    socket.close(Some(CLOSE_NORMAL), Some("done".into()));
    assert_eq!(
        socket.next_event().await,
        Some(SocketEvent::Close {
            code: Some(CLOSE_NORMAL),
            reason: Some("done".into())
        })
    );
    assert_eq!(socket.next_event().await, None);
}
