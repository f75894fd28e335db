//! Per-route rate-limit bucket

use crate::headers::{RateLimitHeaders, MAX_RATE_LIMIT_WAIT};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Throttling state of one bucket key
///
/// `remaining` only goes down when a call is dispatched and is only raised again
/// by response headers.
#[derive(Debug, Clone)]
pub struct RateBucket {
    key: String,
    limit: Option<u32>,
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    reset_after: Option<Duration>,
    hash: Option<String>,
    global: bool,
    retry_after: Option<Duration>,
}

impl RateBucket {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            limit: None,
            remaining: None,
            reset_at: None,
            reset_after: None,
            hash: None,
            global: false,
            retry_after: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    /// How long a call must wait before it may be dispatched
    #[must_use]
    pub fn wait_time(&self, now: Instant) -> Option<Duration> {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset_at)) if reset_at > now => Some(reset_at - now),
            _ => None,
        }
    }

    /// Account for a call handed to the executor
    pub fn on_dispatch(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// Apply the headers of a response
    pub fn update(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset_after) = headers.reset_after {
            self.reset_after = Some(reset_after);
            self.reset_at = Some(instant_after(now, reset_after));
        } else if let Some(reset) = headers.reset {
            let until = epoch_delta(reset);
            self.reset_after = Some(until);
            self.reset_at = Some(instant_after(now, until));
        }
        if let Some(hash) = &headers.bucket {
            self.hash = Some(hash.clone());
        }
        self.global = headers.global;
    }

    /// Block the bucket for `retry_after` after a 429
    pub fn throttle(&mut self, retry_after: Duration, now: Instant) {
        self.remaining = Some(0);
        self.reset_after = Some(retry_after);
        self.reset_at = Some(instant_after(now, retry_after));
        self.retry_after = Some(retry_after);
    }

    /// Whether the reset time has passed (or was never known)
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.reset_at.map_or(true, |reset_at| reset_at <= now)
    }

    /// Diagnostic copy of the bucket
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> BucketSnapshot {
        BucketSnapshot {
            key: self.key.clone(),
            limit: self.limit,
            remaining: self.remaining,
            resets_in: self.reset_at.map(|reset_at| reset_at.saturating_duration_since(now)),
            hash: self.hash.clone(),
            global: self.global,
            retry_after: self.retry_after,
        }
    }
}

/// `now + wait`, held at the wait ceiling when the sum does not fit
pub(crate) fn instant_after(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait)
        .or_else(|| now.checked_add(MAX_RATE_LIMIT_WAIT))
        .unwrap_or(now)
}

/// Time from now until an absolute epoch-seconds timestamp, zero if already past
fn epoch_delta(reset: f64) -> Duration {
    let now_ms = chrono::Utc::now().timestamp_millis() as f64;
    let delta_ms = reset.mul_add(1000.0, -now_ms);
    if delta_ms > 0.0 {
        Duration::from_millis(delta_ms as u64).min(MAX_RATE_LIMIT_WAIT)
    } else {
        Duration::ZERO
    }
}

/// Read-only view of a bucket, attached to rate-limit errors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSnapshot {
    pub key: String,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub resets_in: Option<Duration>,
    pub hash: Option<String>,
    pub global: bool,
    pub retry_after: Option<Duration>,
}

impl BucketSnapshot {
    /// Snapshot of a bucket with no known state
    pub fn empty(key: impl Into<String>) -> Self {
        RateBucket::new(key).snapshot(Instant::now())
    }
}
