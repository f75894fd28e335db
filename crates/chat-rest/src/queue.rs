//! Per-bucket call queue
//!
//! Ordered by priority (lower first), FIFO within a priority. Retried calls go
//! back to the very front.

use crate::error::RestError;
use crate::request::{ApiRequest, ApiResponse};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub(crate) type Reply = oneshot::Sender<Result<ApiResponse, RestError>>;

/// A call waiting for its bucket
#[derive(Debug)]
pub(crate) struct QueuedCall {
    pub request: ApiRequest,
    pub priority: u8,
    pub enqueued_at: Instant,
    pub max_retries: u32,
    pub max_queue_wait: Duration,
    /// 429 retries so far
    pub retries: u32,
    pub reply: Reply,
}

impl QueuedCall {
    /// Latest time the call may still be dispatched, `None` if it never expires
    pub fn deadline(&self) -> Option<Instant> {
        self.enqueued_at.checked_add(self.max_queue_wait)
    }

    pub fn complete(self, result: Result<ApiResponse, RestError>) {
        // The caller may have stopped waiting
        let _ = self.reply.send(result);
    }
}

#[derive(Debug, Default)]
pub(crate) struct CallQueue {
    calls: VecDeque<QueuedCall>,
}

impl CallQueue {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Insert behind every call of equal or higher urgency
    pub fn push(&mut self, call: QueuedCall) {
        let index = self
            .calls
            .iter()
            .position(|queued| queued.priority > call.priority)
            .unwrap_or(self.calls.len());
        self.calls.insert(index, call);
    }

    /// Put a call back at the head, ahead of everything else
    pub fn push_front(&mut self, call: QueuedCall) {
        self.calls.push_front(call);
    }

    pub fn front(&self) -> Option<&QueuedCall> {
        self.calls.front()
    }

    pub fn pop(&mut self) -> Option<QueuedCall> {
        self.calls.pop_front()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = QueuedCall> + '_ {
        self.calls.drain(..)
    }
}
