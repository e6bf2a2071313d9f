//! `RemoteFetchClient` against a local HTTP server.

#![allow(clippy::unwrap_used)]

mod common;

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{Hits, client, fast_options, serve};
use fedigate_common::generate_rsa_keypair;
use fedigate_federation::{ApObject, FetchErrorKind, SignatureConfig};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_fetch_decodes_activity_json() {
    let app = Router::new().route(
        "/notes/1",
        get(|headers: HeaderMap| async move {
            assert!(
                headers[header::ACCEPT]
                    .to_str()
                    .unwrap()
                    .contains("application/activity+json")
            );
            assert_eq!(headers[header::USER_AGENT], "fedigate-test/0.1");
            (
                [(header::CONTENT_TYPE, "application/activity+json; charset=utf-8")],
                Json(json!({
                    "id": "https://remote.example/notes/1",
                    "type": "Note",
                    "attributedTo": "https://remote.example/users/bob"
                })),
            )
        }),
    );
    let origin = serve(app).await;

    let object: ApObject = client()
        .fetch(&format!("{origin}/notes/1"), &fast_options())
        .await
        .unwrap();
    assert_eq!(object.kind(), "Note");
}

#[tokio::test]
async fn test_server_errors_are_retried_until_exhausted() {
    let hits = Hits::default();
    let counter = hits.clone();
    let app = Router::new().route(
        "/notes/1",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.hit();
                StatusCode::SERVICE_UNAVAILABLE
            }
        }),
    );
    let origin = serve(app).await;

    let err = client()
        .fetch::<Value>(&format!("{origin}/notes/1"), &fast_options())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::ServerError);
    assert_eq!(err.status_code, Some(503));
    // first attempt plus max_retries
    assert_eq!(hits.count(), 3);
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let hits = Hits::default();
    let counter = hits.clone();
    let app = Router::new().route(
        "/notes/1",
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.hit() == 1 {
                    StatusCode::BAD_GATEWAY.into_response()
                } else {
                    Json(json!({"ok": true})).into_response()
                }
            }
        }),
    );
    let origin = serve(app).await;

    let value: Value = client()
        .fetch(&format!("{origin}/notes/1"), &fast_options())
        .await
        .unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(hits.count(), 2);
}

#[tokio::test]
async fn test_backoff_doubles_between_attempts() {
    let seen: Arc<Mutex<Vec<Instant>>> = Arc::default();
    let log = seen.clone();
    let app = Router::new().route(
        "/notes/1",
        get(move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(Instant::now());
                StatusCode::BAD_GATEWAY
            }
        }),
    );
    let origin = serve(app).await;

    let options = fast_options().with_initial_retry_delay(Duration::from_millis(100));
    let err = client()
        .fetch::<Value>(&format!("{origin}/notes/1"), &options)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::ServerError);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    let first_wait = seen[1] - seen[0];
    let second_wait = seen[2] - seen[1];
    assert!(first_wait >= Duration::from_millis(100), "first wait {first_wait:?}");
    assert!(second_wait >= Duration::from_millis(200), "second wait {second_wait:?}");
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let hits = Hits::default();
    let counter = hits.clone();
    let app = Router::new().route(
        "/notes/gone",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.hit();
                StatusCode::NOT_FOUND
            }
        }),
    );
    let origin = serve(app).await;

    let err = client()
        .fetch::<Value>(&format!("{origin}/notes/gone"), &fast_options())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::InvalidResponse);
    assert_eq!(err.status_code, Some(404));
    assert!(!err.is_retryable());
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let hits = Hits::default();
    let counter = hits.clone();
    let app = Router::new().route(
        "/notes/1",
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.hit() == 1 {
                    (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "0")]).into_response()
                } else {
                    Json(json!({"ok": true})).into_response()
                }
            }
        }),
    );
    let origin = serve(app).await;

    // Backoff alone would wait 30s; Retry-After: 0 replaces it
    let options = fast_options().with_initial_retry_delay(Duration::from_secs(30));
    let value: Value = tokio::time::timeout(
        Duration::from_secs(5),
        client().fetch(&format!("{origin}/notes/1"), &options),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(hits.count(), 2);
}

#[tokio::test]
async fn test_rate_limit_without_retry_after_uses_default() {
    let app = Router::new().route("/notes/1", get(|| async { StatusCode::TOO_MANY_REQUESTS }));
    let origin = serve(app).await;

    let err = client()
        .fetch::<Value>(&format!("{origin}/notes/1"), &fast_options().with_max_retries(0))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::RateLimit);
    assert_eq!(err.status_code, Some(429));
    assert_eq!(err.retry_after_secs, Some(60));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let app = Router::new().route(
        "/notes/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Json(json!({}))
        }),
    );
    let origin = serve(app).await;

    let options = fast_options()
        .with_timeout(Duration::from_millis(50))
        .with_max_retries(0);
    let err = client()
        .fetch::<Value>(&format!("{origin}/notes/slow"), &options)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_non_json_content_type_is_invalid() {
    let app = Router::new().route(
        "/notes/1",
        get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html></html>") }),
    );
    let origin = serve(app).await;

    let err = client()
        .fetch::<Value>(&format!("{origin}/notes/1"), &fast_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_malformed_body_is_invalid() {
    let app = Router::new().route(
        "/notes/1",
        get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{not json") }),
    );
    let origin = serve(app).await;

    let err = client()
        .fetch::<Value>(&format!("{origin}/notes/1"), &fast_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Bind then drop so the port is closed
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client()
        .fetch::<Value>(&format!("http://{addr}/notes/1"), &fast_options().with_max_retries(0))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::Network);
}

#[tokio::test]
async fn test_invalid_url_is_rejected_without_request() {
    let err = client()
        .fetch::<Value>("ftp://remote.example/notes/1", &fast_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::InvalidResponse);

    let err = client()
        .fetch::<Value>("not a url", &fast_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::InvalidResponse);
}

#[tokio::test]
async fn test_signed_post_with_json_body() {
    let app = Router::new().route(
        "/api/notes/reactions",
        post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            let signature = headers["signature"].to_str().unwrap();
            assert!(signature.contains("keyId=\"https://local.example/users/alice#main-key\""));
            assert!(headers.contains_key("digest"));
            assert!(headers.contains_key("date"));
            assert_eq!(headers["x-extra"], "1");
            Json(json!({"echo": body["noteId"]}))
        }),
    );
    let origin = serve(app).await;

    let keypair = generate_rsa_keypair().unwrap();
    let options = fast_options()
        .with_header("x-extra", "1")
        .with_signature(SignatureConfig {
            key_id: "https://local.example/users/alice#main-key".to_string(),
            private_key_pem: keypair.private_key_pem,
        })
        .with_json_body(json!({"noteId": "abc"}));

    let value: Value = client()
        .fetch(&format!("{origin}/api/notes/reactions"), &options)
        .await
        .unwrap();
    assert_eq!(value["echo"], "abc");
}
