//! Subscription pipeline: params, replies, events and error translation.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use relaybus_core::{BusRequest, BusResponse, ErrorCode};
use relaybus_runtime::{from_async, HandlerError, RequestOptions, SubscriptionOptions};

fn opts() -> RequestOptions {
    RequestOptions::default().timeout_ms(1000)
}

#[tokio::test]
async fn handler_sees_subject_params() {
    let bus = common::mock_bus("car-service").await;
    let sub = bus
        .subscribe("car-service.:brand", |req: BusRequest| {
            Value::String(req.params.get("brand").cloned().unwrap_or_default())
        })
        .await
        .unwrap();
    assert_eq!(sub.pattern(), "car-service.*");
    assert!(!sub.is_http());

    let res = bus
        .request("car-service.tesla", BusRequest::new(json!({})), opts())
        .await
        .unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.data, json!("tesla"));
    assert_eq!(res.from.unwrap().service, "car-service");
    assert!(res.ms.is_some());
}

#[tokio::test]
async fn explicit_params_win_over_subject_params() {
    let bus = common::mock_bus("user-service").await;
    bus.subscribe("user-service.get.:userId.profile.:firstName", |req: BusRequest| {
        json!(req.params)
    })
    .await
    .unwrap();

    let req = BusRequest::default().with_param("userId", "explicit");
    let res = bus
        .request("user-service.get.abc123.profile.bob", req, opts())
        .await
        .unwrap();
    assert_eq!(res.data, json!({ "userId": "explicit", "firstName": "bob" }));
}

#[tokio::test]
async fn http_subjects_are_parsed() {
    let bus = common::mock_bus("api").await;
    let sub = bus
        .subscribe("http.get.users.:userId", |req: BusRequest| {
            json!({ "id": req.params.get("userId") })
        })
        .await
        .unwrap();
    assert!(sub.is_http());
    assert_eq!(sub.http_method(), Some("GET"));

    let res = bus.request("http.get.users.42", BusRequest::default(), opts()).await.unwrap();
    assert_eq!(res.data, json!({ "id": "42" }));
}

#[tokio::test]
async fn async_handlers_reply_like_sync_ones() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        "car-service.slow",
        from_async(|req: BusRequest| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, HandlerError>(BusResponse::with_status(201, json!({ "echo": req.data })))
        }),
    )
    .await
    .unwrap();

    let res = bus
        .request("car-service.slow", BusRequest::new(json!("hi")), opts())
        .await
        .unwrap();
    assert_eq!(res.status, 201);
    assert_eq!(res.data, json!({ "echo": "hi" }));
}

#[tokio::test]
async fn events_reach_handlers_without_reply() {
    let bus = common::mock_bus("car-service").await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe(
        SubscriptionOptions::new("car-service.car-created").no_queue_group(),
        move |req: BusRequest| {
            let _ = tx.send(req);
        },
    )
    .await
    .unwrap();

    bus.publish("car-service.car-created", BusRequest::new(json!({ "id": 1 })).with_req_id("evt-1"))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.data, json!({ "id": 1 }));
    assert_eq!(received.req_id, "evt-1");
    assert_eq!(received.from.unwrap().service, "car-service");
}

#[tokio::test]
async fn handler_errors_pass_through_with_stamps() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        "car-service.get-car",
        from_async(|_req: BusRequest| async move {
            Err::<BusResponse, _>(HandlerError::from(BusResponse::error(ErrorCode::NotFound, "no such car")))
        }),
    )
    .await
    .unwrap();

    let err = bus
        .request("car-service.get-car", BusRequest::default().with_req_id("req-7"), opts())
        .await
        .unwrap_err();
    let res = err.response().unwrap();
    assert_eq!(res.status, 404);
    assert_eq!(res.req_id, "req-7");
    let body = res.error.as_ref().unwrap();
    assert_eq!(body.code, "NOT_FOUND");
    assert_eq!(body.detail.as_deref(), Some("no such car"));
    assert_eq!(body.thrower.as_deref(), Some("car-service"));
    assert!(body.id.is_some());
    assert_eq!(err.to_string(), "404 NOT_FOUND: no such car");
}

#[tokio::test]
async fn returned_error_shapes_are_errors() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe("car-service.teapot", |_req: BusRequest| BusResponse::with_status(418, json!(null)))
        .await
        .unwrap();

    let res = bus
        .request("car-service.teapot", BusRequest::default(), opts().no_throw())
        .await
        .unwrap();
    assert_eq!(res.status, 418);
    assert!(res.is_error());
}

#[tokio::test]
async fn raw_failures_become_internal_errors() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        "car-service.broken",
        from_async(|_req: BusRequest| async move { Err::<BusResponse, _>(HandlerError::from("database is down")) }),
    )
    .await
    .unwrap();

    let err = bus
        .request("car-service.broken", BusRequest::default(), opts())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.code(), Some("INTERNAL_SERVER_ERROR"));
    let detail = err.response().unwrap().error.as_ref().unwrap().detail.clone();
    assert_eq!(detail.as_deref(), Some("database is down"));
}

#[tokio::test]
async fn panicking_handlers_do_not_kill_the_subscription() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe("car-service.explode", |req: BusRequest| -> BusResponse {
        if req.data == json!("boom") {
            panic!("boom");
        }
        BusResponse::ok(json!("still alive"))
    })
    .await
    .unwrap();

    let res = bus
        .request("car-service.explode", BusRequest::new(json!("boom")), opts().no_throw())
        .await
        .unwrap();
    assert_eq!(res.status, 500);
    assert!(res.error.unwrap().detail.unwrap().contains("boom"));

    let res = bus
        .request("car-service.explode", BusRequest::new(json!("calm")), opts())
        .await
        .unwrap();
    assert_eq!(res.data, json!("still alive"));
}

#[tokio::test]
async fn panics_in_async_part_are_caught() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe(
        "car-service.explode-later",
        from_async(|_req: BusRequest| async move {
            tokio::task::yield_now().await;
            if true {
                panic!("later");
            }
            Ok::<_, HandlerError>(BusResponse::ok(json!(null)))
        }),
    )
    .await
    .unwrap();

    let err = bus
        .request("car-service.explode-later", BusRequest::default(), opts())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("INTERNAL_SERVER_ERROR"));
}

#[tokio::test]
async fn unrecognized_encoding_is_rejected() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe("car-service.get-car", |_req: BusRequest| -> Value {
        panic!("handler must not run")
    })
    .await
    .unwrap();

    let mut req = BusRequest::new(json!("abc"));
    req.data_encoding = Some("brotli".into());
    let err = bus.request("car-service.get-car", req, opts()).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.code(), Some("INVALID_DATA_ENCODING"));
}

#[tokio::test]
async fn gzip_requests_are_decompressed_for_the_handler() {
    let bus = common::mock_bus("car-service").await;
    bus.subscribe("car-service.echo", |req: BusRequest| req.data).await.unwrap();

    let payload = json!({ "brand": "volvo", "doors": 4 });
    let res = bus
        .request("car-service.echo", BusRequest::new(payload.clone()).gzip(), opts())
        .await
        .unwrap();
    assert_eq!(res.data, payload);
    assert!(res.data_encoding.is_none());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let bus = common::mock_bus("car-service").await;
    let sub = bus
        .subscribe("car-service.ping", |_req: BusRequest| json!("pong"))
        .await
        .unwrap();
    assert_eq!(bus.registry().len(), 1);

    sub.unsubscribe();
    sub.unsubscribe();
    assert!(bus.registry().is_empty());
    assert!(!sub.is_attached());

    let err = bus
        .request(
            "car-service.ping",
            BusRequest::default(),
            RequestOptions::default().timeout_ms(100),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("BUS_RESPONSE_TIMEOUT"));
}

#[tokio::test]
async fn empty_subject_is_rejected() {
    let bus = common::mock_bus("car-service").await;
    assert!(bus.subscribe("", |_req: BusRequest| json!(null)).await.is_err());
}
