//! Compression and chunked delivery in both directions.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use relaybus_core::protocol::codec::compress_value;
use relaybus_core::{BusRequest, BusResponse, DataMessage};
use relaybus_runtime::transport::{codec, Transport};
use relaybus_runtime::{Bus, BusConfig, MemoryTransport, RequestOptions};

/// Low-redundancy text so compression alone cannot get it under one chunk.
fn noisy_text(len: usize) -> String {
    let alphabet: Vec<char> = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".chars().collect();
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            alphabet[((state >> 33) as usize) % alphabet.len()]
        })
        .collect()
}

fn small_chunks(service: &str) -> BusConfig {
    BusConfig {
        compress_threshold: 512,
        chunk_size: 1024,
        ..common::config(service)
    }
}

#[tokio::test]
async fn large_payloads_arrive_intact_both_ways() {
    let bus = common::connected(small_chunks("storage-service")).await;
    let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));

    let seen_by_handler = Arc::clone(&seen);
    bus.subscribe("storage-service.store", move |req: BusRequest| {
        if let Ok(mut slot) = seen_by_handler.try_lock() {
            *slot = Some(req.data.clone());
        }
        req.data
    })
    .await
    .unwrap();

    let payload = json!({ "blob": noisy_text(20_000), "meta": { "kind": "test" } });
    let res = bus
        .request(
            "storage-service.store",
            BusRequest::new(payload.clone()),
            RequestOptions::default().timeout_ms(3000),
        )
        .await
        .unwrap();

    assert_eq!(seen.lock().await.as_ref(), Some(&payload));
    assert_eq!(res.data, payload);
    assert_eq!(res.status, 200);
    assert!(res.data_encoding.is_none());
    assert!(res.chunks.is_none());
}

#[tokio::test]
async fn compressible_payloads_need_no_chunks() {
    let bus = common::connected(small_chunks("storage-service")).await;
    bus.subscribe("storage-service.echo", |req: BusRequest| req.data)
        .await
        .unwrap();

    let payload = json!({ "blob": "a".repeat(50_000) });
    let res = bus
        .request(
            "storage-service.echo",
            BusRequest::new(payload.clone()),
            RequestOptions::default().timeout_ms(3000),
        )
        .await
        .unwrap();
    assert_eq!(res.data, payload);
}

#[tokio::test]
async fn request_many_reassembles_chunked_responses() {
    let bus = common::connected(small_chunks("storage-service")).await;
    let big = json!(noisy_text(8_000));
    let answer = big.clone();
    bus.subscribe("storage-service.dump", move |_req: BusRequest| answer.clone())
        .await
        .unwrap();

    let responses = bus
        .request_many(
            "storage-service.dump",
            BusRequest::default(),
            RequestOptions::default().max_responses(1).timeout_ms(3000),
        )
        .await
        .unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].data, big);
}

/// Answers every request on `subject` with the messages `reply` builds,
/// published in order as `(subject, payload)` pairs.
async fn raw_responder<F>(transport: Arc<MemoryTransport>, subject: &str, reply: F)
where
    F: Fn(&BusRequest, &str) -> Vec<(String, Value)> + Send + 'static,
{
    let (_, mut stream) = transport.subscribe(subject, None).await.unwrap();
    tokio::spawn(async move {
        while let Some(msg) = stream.recv().await {
            let req: BusRequest = codec::decode(&msg.payload).unwrap();
            let reply_to = msg.reply_to.unwrap();
            for (target, body) in reply(&req, &reply_to) {
                transport.publish(&target, codec::encode(&body).unwrap(), None).await.unwrap();
            }
        }
    });
}

#[tokio::test]
async fn absurd_request_chunk_count_is_refused() {
    let transport = Arc::new(MemoryTransport::new());
    let bus = Bus::new(common::config("storage-service")).unwrap();
    bus.connect_with_transport(transport.clone()).await.unwrap();
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    bus.subscribe("storage-service.store", move |req: BusRequest| {
        flag.store(true, Ordering::SeqCst);
        req.data
    })
    .await
    .unwrap();

    let (_, mut inbox) = transport.subscribe("inbox.store", None).await.unwrap();
    let raw = json!({ "reqId": "r", "transactionId": "t", "data": {}, "chunks": 4_000_000_000_u32 });
    transport
        .publish("storage-service.store", codec::encode(&raw).unwrap(), Some("inbox.store"))
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(1), inbox.recv()).await.unwrap().unwrap();
    let res: BusResponse = codec::decode(&msg.payload).unwrap();
    assert_eq!(res.status, 400);
    assert_eq!(res.error_code(), Some("BAD_REQUEST"));
    assert_eq!(res.req_id, "r");
    assert!(res.error.unwrap().detail.unwrap().contains("exceeds the limit"));
    assert!(!called.load(Ordering::SeqCst));

    let res = bus
        .request("storage-service.store", BusRequest::new(json!("still alive")), RequestOptions::default().timeout_ms(1000))
        .await
        .unwrap();
    assert_eq!(res.data, json!("still alive"));
}

#[tokio::test]
async fn absurd_response_chunk_count_is_an_encoding_error() {
    let transport = Arc::new(MemoryTransport::new());
    raw_responder(transport.clone(), "storage-service.huge", |req, reply_to| {
        let reply = json!({
            "reqId": req.req_id, "transactionId": req.transaction_id, "status": 200,
            "data": {}, "chunks": 4_000_000_000_u32, "dataEncoding": "gzip"
        });
        vec![(reply_to.to_string(), reply)]
    })
    .await;

    let bus = Bus::new(common::config("web")).unwrap();
    bus.connect_with_transport(transport).await.unwrap();
    let res = bus
        .request("storage-service.huge", BusRequest::default(), RequestOptions::default().timeout_ms(1000).no_throw())
        .await
        .unwrap();
    assert_eq!(res.error_code(), Some("INVALID_DATA_ENCODING"));
    assert!(res.error.unwrap().detail.unwrap().contains("exceeds the limit"));
}

#[tokio::test]
async fn chunks_without_a_count_wait_for_the_reply() {
    let transport = Arc::new(MemoryTransport::new());
    let payload = json!({ "brand": "volvo", "doors": 4 });
    let encoded = compress_value(&payload).unwrap();
    raw_responder(transport.clone(), "storage-service.fetch", move |req, reply_to| {
        let piece = DataMessage {
            req_id: req.req_id.clone(),
            data: encoded.clone(),
            chunk: 0,
            ..DataMessage::default()
        };
        let reply = json!({
            "reqId": req.req_id, "transactionId": req.transaction_id, "status": 200,
            "data": {}, "chunks": 1, "dataEncoding": "gzip"
        });
        vec![
            (req.data_subject.clone().unwrap(), serde_json::to_value(piece).unwrap()),
            (reply_to.to_string(), reply),
        ]
    })
    .await;

    let bus = Bus::new(common::config("web")).unwrap();
    bus.connect_with_transport(transport).await.unwrap();
    let res = bus
        .request("storage-service.fetch", BusRequest::default(), RequestOptions::default().timeout_ms(1000))
        .await
        .unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.data, payload);
}

#[tokio::test]
async fn missing_request_chunks_never_reach_the_handler() {
    let transport = Arc::new(MemoryTransport::new());
    let server = Bus::new(BusConfig {
        chunk_timeout_ms: 100,
        ..common::config("storage-service")
    })
    .unwrap();
    server.connect_with_transport(transport.clone()).await.unwrap();
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    server
        .subscribe("storage-service.store", move |_req: BusRequest| {
            flag.store(true, Ordering::SeqCst);
            json!({})
        })
        .await
        .unwrap();
    let baseline = transport.subscription_count();

    // Announces chunks it never split, so the ask goes unanswered.
    let client = Bus::new(common::config("web")).unwrap();
    client.connect_with_transport(transport.clone()).await.unwrap();
    let client_subs = transport.subscription_count() - baseline;
    let mut req = BusRequest::new(json!({}));
    req.chunks = Some(3);
    let err = client
        .request("storage-service.store", req, RequestOptions::default().timeout_ms(400))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("BUS_RESPONSE_TIMEOUT"));
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(transport.subscription_count(), baseline + client_subs);
}
