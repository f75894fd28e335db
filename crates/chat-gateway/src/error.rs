//! Gateway error types

use crate::protocol::{CloseCode, OpCode};
use std::time::Duration;
use thiserror::Error;

/// Gateway error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Socket could not be opened
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// Transport error on an open socket
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Server did not send Hello in time
    #[error("No hello received within {0:?}")]
    HelloTimeout(Duration),

    /// Server closed with a non-recoverable code
    #[error("Fatal close: {0}")]
    FatalClose(CloseCode),

    /// Reconnect budget used up
    #[error("Shard {shard_id} gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { shard_id: u32, attempts: u32 },

    #[error("Invalid shard {shard_id} for {total_shards} total shards")]
    InvalidShard { shard_id: u32, total_shards: u32 },

    #[error("Invalid shard count: {0}")]
    InvalidShardCount(u32),

    /// Shard is not in a state that accepts outbound messages
    #[error("Shard is not connected")]
    NotConnected,

    /// Op code that the client is not allowed to send
    #[error("Op code {0} cannot be sent by the client")]
    UnsupportedOpcode(OpCode),

    /// Connection task is gone
    #[error("Connection task has stopped")]
    ChannelClosed,

    /// Connection or manager was torn down
    #[error("Destroyed")]
    Destroyed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether this error ends the connection for good
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalClose(_)
                | Self::ReconnectExhausted { .. }
                | Self::InvalidShard { .. }
                | Self::InvalidShardCount(_)
                | Self::Destroyed
        )
    }

    /// Close code attached to this error, if any
    #[must_use]
    pub const fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::FatalClose(code) => Some(*code),
            _ => None,
        }
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
