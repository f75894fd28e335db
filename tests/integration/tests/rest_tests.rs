//! REST Integration Tests
//!
//! Calls go through `HttpExecutor` to a local axum server that answers with
//! rate-limit headers.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use chat_rest::{ApiRequest, RequestOptions, RestClient, RestError};
use integration_tests::fake_api::{CHANNEL_RESET_AFTER, MESSAGE_RETRY_AFTER};
use integration_tests::{rest_config, FakeApi, TEST_TOKEN};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    channel_id: String,
    content: String,
}

async fn setup() -> (FakeApi, RestClient) {
    let api = FakeApi::start("ws://gateway.test").await.unwrap();
    let client = RestClient::new(TEST_TOKEN, rest_config(&api.base_url())).unwrap();
    (api, client)
}

// ============================================================================
// Request Tests
// ============================================================================

#[tokio::test]
async fn test_gateway_bot() {
    let (api, client) = setup().await;

    let bot = client.gateway_bot().await.unwrap();
    assert_eq!(bot.url, "ws://gateway.test");
    assert_eq!(bot.shards, 2);
    assert_eq!(bot.session_start_limit.remaining, 999);

    let hits = api.hits_for("/gateway/bot");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].method, Method::GET);
    assert_eq!(hits[0].authorization.as_deref(), Some("Bot test-token"));

    client.shutdown();
}

#[tokio::test]
async fn test_audit_reason_is_sent() {
    let (api, client) = setup().await;

    let request = ApiRequest::get("/channels/9").reason("cleanup");
    client.send(request, RequestOptions::default()).await.unwrap();

    let hits = api.hits_for("/channels/9");
    assert_eq!(hits[0].audit_reason.as_deref(), Some("cleanup"));

    client.shutdown();
}

#[tokio::test]
async fn test_not_found_is_api_error() {
    let (api, client) = setup().await;

    let error = client.get::<Value>("/users/1").await.unwrap_err();
    match &error {
        RestError::Api { status, body } => {
            assert_eq!(*status, 404);
            assert!(body.contains("Unknown Channel"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.was_dispatched());
    assert_eq!(api.hits().len(), 1);

    client.shutdown();
}

// ============================================================================
// Rate Limit Tests
// ============================================================================

#[tokio::test]
async fn test_rate_limited_call_is_retried() {
    let (api, client) = setup().await;

    let message: Message = client
        .post("/channels/1/messages", &json!({"content": "hello"}))
        .await
        .unwrap();
    assert_eq!(message.id, "1");
    assert_eq!(message.channel_id, "1");
    assert_eq!(message.content, "hello");

    let hits = api.hits_for("/channels/1/messages");
    assert_eq!(hits.len(), 2);
    let gap = hits[1].at.duration_since(hits[0].at);
    assert!(
        gap >= Duration::from_secs_f64(MESSAGE_RETRY_AFTER),
        "retried after {gap:?}"
    );

    let stats = client.scheduler().stats();
    assert_eq!(stats.throttled_requests, 1);
    assert_eq!(stats.total_requests, 2);

    client.shutdown();
}

#[tokio::test]
async fn test_exhausted_bucket_delays_next_call() {
    let (api, client) = setup().await;

    client.get::<Value>("/channels/3").await.unwrap();
    let snapshot = client
        .scheduler()
        .bucket("GET /channels/:channel_id")
        .expect("bucket recorded");
    assert_eq!(snapshot.remaining, Some(0));
    assert_eq!(snapshot.limit, Some(1));

    client.get::<Value>("/channels/3").await.unwrap();

    let hits = api.hits_for("/channels/3");
    assert_eq!(hits.len(), 2);
    let gap = hits[1].at.duration_since(hits[0].at);
    // Header precision is milliseconds
    assert!(
        gap >= Duration::from_secs_f64(CHANNEL_RESET_AFTER) - Duration::from_millis(5),
        "second call after {gap:?}"
    );

    client.shutdown();
}

#[tokio::test]
async fn test_channels_share_route_bucket() {
    let (api, client) = setup().await;

    client.get::<Value>("/channels/4").await.unwrap();

    // Channel 5 is the same route, so it waits out channel 4's reset
    client.get::<Value>("/channels/5").await.unwrap();

    let first = api.hits_for("/channels/4");
    let second = api.hits_for("/channels/5");
    assert_eq!((first.len(), second.len()), (1, 1));
    let gap = second[0].at.duration_since(first[0].at);
    assert!(
        gap >= Duration::from_secs_f64(CHANNEL_RESET_AFTER) - Duration::from_millis(5),
        "second channel fetched after {gap:?}"
    );
    assert_eq!(client.scheduler().bucket_count(), 1);

    client.shutdown();
}

#[tokio::test]
async fn test_buckets_do_not_block_each_other() {
    let (api, client) = setup().await;

    client.get::<Value>("/channels/4").await.unwrap();

    // Exhausted channel route must not hold back a different route
    let started = tokio::time::Instant::now();
    let error = client.get::<Value>("/users/5").await.unwrap_err();
    assert!(matches!(error, RestError::Api { status: 404, .. }), "{error:?}");
    assert!(started.elapsed() < Duration::from_secs_f64(CHANNEL_RESET_AFTER));
    assert_eq!(api.hits().len(), 2);

    client.shutdown();
}

#[tokio::test]
async fn test_shutdown_rejects_new_calls() {
    let (api, client) = setup().await;

    client.shutdown();
    let error = client.get::<Value>("/channels/6").await.unwrap_err();
    assert!(!error.was_dispatched(), "unexpected error: {error:?}");
    assert!(api.hits().is_empty());
}
