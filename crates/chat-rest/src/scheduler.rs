//! Rate-limit scheduler
//!
//! One queue and one drain task per bucket key. A bucket dispatches a single call
//! at a time; different buckets run in parallel. A global throttle holds every
//! bucket until it clears.

use crate::bucket::{instant_after, BucketSnapshot, RateBucket};
use crate::error::RestError;
use crate::executor::RequestExecutor;
use crate::headers::{RateLimitBody, RateLimitHeaders};
use crate::queue::{CallQueue, QueuedCall};
use crate::request::{ApiRequest, ApiResponse, RequestOptions};
use crate::route::Route;
use chat_common::RestConfig;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info, trace, warn};

/// Wait applied to a 429 that carries no usable delay
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Running scheduler counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    /// Calls handed to the executor, retries included
    pub total_requests: u64,
    /// Calls accepted into a queue
    pub queued_requests: u64,
    /// 429 responses
    pub throttled_requests: u64,
    /// 429 responses flagged global
    pub global_throttled: u64,
    /// Mean executor round trip
    pub average_latency: Option<Duration>,
    /// Deepest single bucket queue seen
    pub peak_queue_size: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    queued: u64,
    throttled: u64,
    global_throttled: u64,
    latency_sum: Duration,
    latency_count: u32,
    peak_queue_size: usize,
}

struct BucketState {
    bucket: RateBucket,
    queue: CallQueue,
    /// A drain task owns this bucket
    draining: bool,
}

impl BucketState {
    fn new(key: &str) -> Self {
        Self {
            bucket: RateBucket::new(key),
            queue: CallQueue::default(),
            draining: false,
        }
    }
}

type SharedBucket = Arc<Mutex<BucketState>>;

struct Inner {
    executor: Arc<dyn RequestExecutor>,
    config: RestConfig,
    buckets: DashMap<String, SharedBucket>,
    global_reset: Mutex<Option<Instant>>,
    /// Client-side ceiling across all buckets
    limiter: Option<DefaultDirectRateLimiter>,
    counters: Mutex<Counters>,
    shutdown: watch::Sender<bool>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

/// Queues API calls per bucket and dispatches them through an executor
///
/// Cloning is cheap; clones share the same buckets.
#[derive(Clone)]
pub struct RateLimitScheduler {
    inner: Arc<Inner>,
}

impl RateLimitScheduler {
    /// Create a scheduler and start its cleanup task
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(executor: Arc<dyn RequestExecutor>, config: RestConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let limiter = config
            .global_requests_per_second
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        let inner = Arc::new(Inner {
            executor,
            config,
            buckets: DashMap::new(),
            global_reset: Mutex::new(None),
            limiter,
            counters: Mutex::new(Counters::default()),
            shutdown,
            cleanup_task: Mutex::new(None),
        });

        let cleanup = spawn_cleanup(&inner);
        *inner.cleanup_task.lock() = Some(cleanup);

        Self { inner }
    }

    /// Queue a call and wait for its response
    ///
    /// Fails immediately with [`RestError::QueueFull`] when the bucket queue is at
    /// capacity.
    pub async fn enqueue(
        &self,
        request: ApiRequest,
        options: RequestOptions,
    ) -> Result<ApiResponse, RestError> {
        let inner = &self.inner;
        if inner.is_shut_down() {
            return Err(RestError::QueueAbandoned);
        }

        let key = request.route().bucket_key();
        let (reply, response) = oneshot::channel();
        let call = QueuedCall {
            request,
            priority: options.priority,
            enqueued_at: Instant::now(),
            max_retries: options.max_retries.unwrap_or(inner.config.max_retries),
            max_queue_wait: options.max_queue_wait.unwrap_or(inner.config.max_queue_wait),
            retries: 0,
            reply,
        };

        let start_drain = {
            let entry = inner
                .buckets
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(BucketState::new(&key))));
            let state = Arc::clone(entry.value());
            let mut guard = state.lock();

            let capacity = inner.config.max_queue_size;
            if guard.queue.len() >= capacity {
                warn!(bucket = %key, capacity, "Queue full, rejecting call");
                return Err(RestError::QueueFull {
                    bucket: key,
                    capacity,
                });
            }

            guard.queue.push(call);
            inner.record_queued(guard.queue.len());
            trace!(bucket = %key, queued = guard.queue.len(), "Call queued");

            let start = !guard.draining;
            guard.draining = true;
            drop(guard);
            start.then_some(state)
        };

        if let Some(state) = start_drain {
            tokio::spawn(drain(Arc::clone(inner), key, state));
        }

        response.await.unwrap_or(Err(RestError::QueueAbandoned))
    }

    /// Queue a call with default options
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, RestError> {
        self.enqueue(request, RequestOptions::default()).await
    }

    /// Apply headers of a response obtained outside the scheduler
    pub fn record_response(&self, route: &Route, headers: &HeaderMap) -> Result<(), RestError> {
        let parsed = RateLimitHeaders::parse(headers)?;
        let key = route.bucket_key();
        let now = Instant::now();

        let state = Arc::clone(
            self.inner
                .buckets
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(BucketState::new(&key))))
                .value(),
        );
        state.lock().bucket.update(&parsed, now);

        if parsed.global {
            if let Some(retry_after) = parsed.retry_after {
                self.inner.set_global(instant_after(now, retry_after));
            }
        }
        debug!(
            bucket = %key,
            remaining = ?parsed.remaining,
            "Seeded bucket from external response"
        );
        Ok(())
    }

    /// Snapshot of one bucket
    pub fn bucket(&self, key: &str) -> Option<BucketSnapshot> {
        let state = self.inner.buckets.get(key).map(|entry| Arc::clone(entry.value()))?;
        let snapshot = state.lock().bucket.snapshot(Instant::now());
        Some(snapshot)
    }

    /// Calls waiting in one bucket
    pub fn queue_len(&self, key: &str) -> usize {
        self.inner
            .buckets
            .get(key)
            .map_or(0, |entry| entry.value().lock().queue.len())
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.buckets.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = self.inner.counters.lock();
        SchedulerStats {
            total_requests: counters.total,
            queued_requests: counters.queued,
            throttled_requests: counters.throttled,
            global_throttled: counters.global_throttled,
            average_latency: (counters.latency_count > 0)
                .then(|| counters.latency_sum / counters.latency_count),
            peak_queue_size: counters.peak_queue_size,
        }
    }

    /// Drop buckets whose reset has passed and which have nothing queued
    pub fn cleanup(&self) -> usize {
        self.inner.cleanup()
    }

    /// Stop every drain loop and the cleanup task
    ///
    /// Queued calls fail with [`RestError::QueueAbandoned`]; calls already handed to
    /// the executor still complete.
    pub fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        if let Some(task) = self.inner.cleanup_task.lock().take() {
            task.abort();
        }

        let buckets: Vec<(String, SharedBucket)> = self
            .inner
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        for (key, state) in &buckets {
            abandon(key, state);
        }
        info!(buckets = buckets.len(), "Rate limit scheduler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }
}

impl std::fmt::Debug for RateLimitScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitScheduler")
            .field("buckets", &self.bucket_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Inner {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn global_wait(&self, now: Instant) -> Option<Duration> {
        self.global_reset
            .lock()
            .filter(|reset| *reset > now)
            .map(|reset| reset - now)
    }

    fn set_global(&self, until: Instant) {
        let mut reset = self.global_reset.lock();
        if reset.map_or(true, |current| current < until) {
            *reset = Some(until);
        }
    }

    /// Time until the client-side ceiling admits another call
    fn limiter_wait(&self) -> Option<Duration> {
        let limiter = self.limiter.as_ref()?;
        limiter
            .check()
            .err()
            .map(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }

    fn record_queued(&self, queue_len: usize) {
        let mut counters = self.counters.lock();
        counters.queued += 1;
        counters.peak_queue_size = counters.peak_queue_size.max(queue_len);
    }

    fn record_dispatch(&self, latency: Duration) {
        let mut counters = self.counters.lock();
        counters.total += 1;
        counters.latency_sum += latency;
        counters.latency_count = counters.latency_count.saturating_add(1);
    }

    fn record_throttle(&self, global: bool) {
        let mut counters = self.counters.lock();
        counters.throttled += 1;
        if global {
            counters.global_throttled += 1;
        }
    }

    fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.buckets.retain(|_, state| {
            let guard = state.lock();
            let idle = guard.queue.is_empty() && !guard.draining && guard.bucket.is_expired(now);
            if idle {
                removed += 1;
            }
            !idle
        });
        removed
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
    }
}

fn spawn_cleanup(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let period = inner.config.cleanup_interval.max(Duration::from_millis(1));
    let mut shutdown = inner.shutdown.subscribe();

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return,
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let removed = inner.cleanup();
            if removed > 0 {
                debug!(removed, remaining = inner.buckets.len(), "Reaped idle buckets");
            }
        }
    })
}

/// Reject everything still queued in a bucket
fn abandon(key: &str, state: &SharedBucket) {
    let calls: Vec<QueuedCall> = state.lock().queue.drain().collect();
    if !calls.is_empty() {
        info!(bucket = %key, count = calls.len(), "Abandoning queued calls");
    }
    for call in calls {
        call.complete(Err(RestError::QueueAbandoned));
    }
}

/// Service one bucket until its queue is empty or the scheduler shuts down
async fn drain(inner: Arc<Inner>, key: String, state: SharedBucket) {
    let mut shutdown = inner.shutdown.subscribe();
    trace!(bucket = %key, "Drain started");

    loop {
        if *shutdown.borrow() {
            abandon(&key, &state);
            state.lock().draining = false;
            return;
        }

        let now = Instant::now();
        let wait = {
            let mut guard = state.lock();
            if guard.queue.is_empty() {
                guard.draining = false;
                trace!(bucket = %key, "Queue empty, drain stopped");
                return;
            }
            let Some(head) = guard.queue.front() else {
                continue;
            };

            if head.reply.is_closed() {
                // Caller stopped waiting before dispatch
                guard.queue.pop();
                continue;
            }

            let retried = head.retries > 0;
            let deadline = head.deadline();
            let wait = match (guard.bucket.wait_time(now), inner.global_wait(now)) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };

            if let (Some(wait), Some(deadline)) = (wait, deadline) {
                if !retried && instant_after(now, wait) > deadline {
                    let expired = guard.queue.pop();
                    drop(guard);
                    if let Some(call) = expired {
                        warn!(
                            bucket = %key,
                            wait_ms = wait.as_millis() as u64,
                            "Queue wait exceeded, failing call"
                        );
                        let max_wait = call.max_queue_wait;
                        call.complete(Err(RestError::QueueTimeout {
                            bucket: key.clone(),
                            wait,
                            max_wait,
                        }));
                    }
                    continue;
                }
            }
            wait.or_else(|| inner.limiter_wait())
        };

        if let Some(wait) = wait {
            trace!(bucket = %key, wait_ms = wait.as_millis() as u64, "Waiting for rate limit");
            tokio::select! {
                () = sleep(wait) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        let Some(mut call) = ({
            let mut guard = state.lock();
            let call = guard.queue.pop();
            if call.is_some() {
                guard.bucket.on_dispatch();
            }
            call
        }) else {
            continue;
        };

        let started = Instant::now();
        let result = inner.executor.execute(&call.request).await;
        inner.record_dispatch(started.elapsed());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(bucket = %key, error = %e, "Call failed");
                call.complete(Err(e));
                continue;
            }
        };

        let now = Instant::now();
        let headers = RateLimitHeaders::parse(&response.headers).unwrap_or_else(|e| {
            warn!(bucket = %key, error = %e, "Ignoring malformed rate-limit headers");
            RateLimitHeaders::default()
        });

        if !response.is_rate_limited() {
            if !headers.is_empty() {
                state.lock().bucket.update(&headers, now);
            }
            trace!(bucket = %key, status = response.status, "Call completed");
            call.complete(Ok(response));
            continue;
        }

        let body = RateLimitBody::parse(&response.body);
        let retry_after = body
            .as_ref()
            .map(RateLimitBody::retry_after)
            .or(headers.retry_after)
            .or(headers.reset_after)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        let global = headers.global || body.as_ref().is_some_and(|b| b.global);

        inner.record_throttle(global);
        if global {
            inner.set_global(instant_after(now, retry_after));
        }

        let snapshot = {
            let mut guard = state.lock();
            if !headers.is_empty() {
                guard.bucket.update(&headers, now);
            }
            guard.bucket.throttle(retry_after, now);

            if call.retries < call.max_retries {
                call.retries += 1;
                warn!(
                    bucket = %key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    attempt = call.retries,
                    global,
                    "Rate limited, retrying"
                );
                guard.queue.push_front(call);
                continue;
            }
            guard.bucket.snapshot(now)
        };

        warn!(bucket = %key, retries = call.retries, "Rate limited, retry budget spent");
        call.complete(Err(RestError::RateLimited(Box::new(snapshot))));
    }
}
