//! HTTP API stand-in
//!
//! Serves a handful of versioned routes with rate-limit headers:
//!
//! - `GET  /api/v10/gateway/bot` recommends two shards
//! - `POST /api/v10/channels/:id/messages` answers the first call with a 429
//! - `GET  /api/v10/channels/:id` reports an exhausted bucket that resets in 500ms
//! - anything else is a 404

use crate::fixtures::{gateway_bot_body, message_body, rate_limited_body};
use anyhow::Result;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// `retry_after` of the scripted 429, in seconds
pub const MESSAGE_RETRY_AFTER: f64 = 0.2;

/// `x-ratelimit-reset-after` of `GET /channels/:id`, in seconds
pub const CHANNEL_RESET_AFTER: f64 = 0.5;

/// One request the server saw
#[derive(Debug, Clone)]
pub struct Hit {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub audit_reason: Option<String>,
    pub at: Instant,
}

struct ApiState {
    gateway: Value,
    hits: Mutex<Vec<Hit>>,
    throttled_once: Mutex<bool>,
    next_message_id: Mutex<u64>,
}

impl ApiState {
    fn record(&self, method: &Method, uri: &Uri, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        self.hits.lock().push(Hit {
            method: method.clone(),
            path: uri.path().to_string(),
            authorization: header("authorization"),
            audit_reason: header("x-audit-log-reason"),
            at: Instant::now(),
        });
    }
}

/// API server bound to an ephemeral local port
pub struct FakeApi {
    addr: SocketAddr,
    state: Arc<ApiState>,
    _handle: JoinHandle<()>,
}

impl FakeApi {
    /// Start the server; `gateway_url` is what `/gateway/bot` points clients at
    pub async fn start(gateway_url: &str) -> Result<Self> {
        let state = Arc::new(ApiState {
            gateway: gateway_bot_body(gateway_url, 2),
            hits: Mutex::new(Vec::new()),
            throttled_once: Mutex::new(false),
            next_message_id: Mutex::new(0),
        });

        let app = Router::new()
            .route("/api/v10/gateway/bot", get(gateway_bot))
            .route("/api/v10/channels/:id/messages", post(create_message))
            .route("/api/v10/channels/:id", get(get_channel))
            .fallback(not_found)
            .layer(middleware::from_fn_with_state(Arc::clone(&state), record))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// API root without the version segment, suitable for `RestConfig::base_url`
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Every request seen so far
    pub fn hits(&self) -> Vec<Hit> {
        self.state.hits.lock().clone()
    }

    /// Requests seen for `path` (without the `/api/v10` prefix)
    pub fn hits_for(&self, path: &str) -> Vec<Hit> {
        let full = format!("/api/v10{path}");
        self.hits().into_iter().filter(|hit| hit.path == full).collect()
    }
}

fn rate_limit_headers(limit: u32, remaining: u32, reset_after: f64, bucket: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut insert = |name: &'static str, value: String| {
        if let Ok(value) = value.parse() {
            headers.insert(name, value);
        }
    };
    insert("x-ratelimit-limit", limit.to_string());
    insert("x-ratelimit-remaining", remaining.to_string());
    insert("x-ratelimit-reset-after", format!("{reset_after:.3}"));
    insert("x-ratelimit-bucket", bucket.to_string());
    headers
}

async fn record(State(state): State<Arc<ApiState>>, request: Request, next: Next) -> Response {
    state.record(request.method(), request.uri(), request.headers());
    next.run(request).await
}

async fn gateway_bot(State(state): State<Arc<ApiState>>) -> Json<Value> {
    Json(state.gateway.clone())
}

async fn create_message(
    State(state): State<Arc<ApiState>>,
    Path(channel_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let throttle = {
        let mut throttled = state.throttled_once.lock();
        !std::mem::replace(&mut *throttled, true)
    };

    if throttle {
        let mut headers = rate_limit_headers(5, 0, MESSAGE_RETRY_AFTER, "messages");
        if let Ok(value) = format!("{MESSAGE_RETRY_AFTER}").parse() {
            headers.insert("retry-after", value);
        }
        if let Ok(value) = "user".parse() {
            headers.insert("x-ratelimit-scope", value);
        }
        return (
            StatusCode::TOO_MANY_REQUESTS,
            headers,
            Json(rate_limited_body(MESSAGE_RETRY_AFTER, false)),
        )
            .into_response();
    }

    let id = {
        let mut next = state.next_message_id.lock();
        *next += 1;
        *next
    };
    let content = body.get("content").and_then(Value::as_str).unwrap_or_default();
    (
        rate_limit_headers(5, 4, 1.0, "messages"),
        Json(message_body(&channel_id, id, content)),
    )
        .into_response()
}

async fn get_channel(Path(channel_id): Path<String>) -> Response {
    (
        rate_limit_headers(1, 0, CHANNEL_RESET_AFTER, "channels"),
        Json(json!({"id": channel_id, "type": 0, "name": "general"})),
    )
        .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "Unknown Channel", "code": 10003})),
    )
        .into_response()
}
