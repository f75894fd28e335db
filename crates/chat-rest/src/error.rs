//! REST error types

use crate::bucket::BucketSnapshot;
use std::time::Duration;
use thiserror::Error;

/// REST error type
#[derive(Debug, Error)]
pub enum RestError {
    /// Bucket queue already holds the maximum number of calls
    #[error("Queue for bucket {bucket} is full ({capacity} calls)")]
    QueueFull { bucket: String, capacity: usize },

    /// Call would have waited longer than allowed before dispatch
    #[error("Call in bucket {bucket} would wait {wait:?}, more than the allowed {max_wait:?}")]
    QueueTimeout {
        bucket: String,
        wait: Duration,
        max_wait: Duration,
    },

    /// Scheduler shut down before the call was dispatched
    #[error("Call abandoned before dispatch")]
    QueueAbandoned,

    /// Still throttled after the retry budget was spent
    #[error("Rate limited on bucket {}", .0.key)]
    RateLimited(Box<BucketSnapshot>),

    /// Non-success response
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// The executor failed to complete the call
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request body could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid value for header {name}: {value}")]
    InvalidHeader { name: String, value: String },
}

impl RestError {
    /// Whether the call reached the executor
    ///
    /// `false` means the call never left its queue.
    #[must_use]
    pub const fn was_dispatched(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Api { .. } | Self::Transport(_) | Self::Decode(_)
        )
    }

    /// HTTP status carried by the error, if any
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited(_) => Some(429),
            _ => None,
        }
    }
}

/// REST result type
pub type RestResult<T> = Result<T, RestError>;
