//! Integration tests for the HTTP destination and inbox router.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use anyhow::anyhow;
use axum::body::Body;
use chrono::Utc;
use courier_core::{handler, Context, Destination, HandlerError, Message, Receiver};
use courier_http::{receive_router, HttpDestination};
use http::{header::CONTENT_TYPE, Request, StatusCode};
use tower::ServiceExt;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn stamped_message() -> Message {
    Message::new("customers.created", br#"{"id":42}"#.to_vec())
        .unwrap()
        .with_published_at(Utc::now())
}

#[tokio::test]
async fn destination_posts_json_and_accepts_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let destination = HttpDestination::new(format!("{}/events", server.uri()));
    destination.deliver(&Context::new(), &[stamped_message()]).await.unwrap();
}

#[tokio::test]
async fn destination_reports_non_2xx_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let destination = HttpDestination::new(format!("{}/events", server.uri()));
    let error = destination.deliver(&Context::new(), &[stamped_message()]).await.unwrap_err();
    assert!(error.to_string().contains("503"));
}

#[tokio::test]
async fn batches_are_posted_as_a_json_array() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let destination = HttpDestination::new(format!("{}/events", server.uri()));
    destination
        .deliver(&Context::new(), &[stamped_message(), stamped_message()])
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.is_array());
    assert_eq!(body.as_array().unwrap().len(), 2);
}

fn post_message(message: &Message) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(message.encode().unwrap()))
        .unwrap()
}

#[tokio::test]
async fn router_dispatches_to_the_registered_handler() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut receiver = Receiver::new();
    {
        let calls = Arc::clone(&calls);
        receiver
            .on(
                "inbox",
                "customers.created",
                handler(move |_, delivery| {
                    let calls = Arc::clone(&calls);
                    async move {
                        assert_eq!(delivery.queue, "inbox");
                        assert_eq!(delivery.attempt, 1);
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();
    }

    let router = receive_router(Arc::new(receiver), "inbox");
    let response = router.oneshot(post_message(&stamped_message())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn router_maps_handler_failure_to_500() {
    let mut receiver = Receiver::new();
    receiver
        .on(
            "inbox",
            "customers.created",
            handler(|_, _| async { Err(HandlerError::retry(anyhow!("not now"))) }),
        )
        .unwrap();

    let router = receive_router(Arc::new(receiver), "inbox");
    let response = router.oneshot(post_message(&stamped_message())).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn router_maps_missing_handler_to_404() {
    let router = receive_router(Arc::new(Receiver::new()), "inbox");
    let response = router.oneshot(post_message(&stamped_message())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn router_rejects_malformed_bodies() {
    let router = receive_router(Arc::new(Receiver::new()), "inbox");
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("not a message"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
