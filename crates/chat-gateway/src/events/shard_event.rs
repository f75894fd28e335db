//! Typed lifecycle and dispatch notifications emitted by connections

use super::GatewayEventType;
use crate::error::GatewayError;
use chat_core::Snowflake;
use serde_json::Value;
use std::time::Duration;

/// A dispatch (op 0) received by a shard
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub shard_id: u32,
    pub sequence: u64,
    /// Raw event name from the `t` field
    pub name: String,
    /// Known event type, `None` for names this client does not model
    pub kind: Option<GatewayEventType>,
    pub data: Value,
}

/// Notification emitted by a connection
#[derive(Debug)]
pub enum ShardEvent {
    /// Opening the socket
    Connecting { shard_id: u32, url: String },
    /// Server accepted the handshake
    Connected { shard_id: u32 },
    /// New session established
    Ready {
        shard_id: u32,
        session_id: String,
        guilds: Vec<Snowflake>,
    },
    /// Session resumed; `replayed` dispatches were received between Resume and RESUMED
    Resumed { shard_id: u32, replayed: u64 },
    Dispatch(DispatchEvent),
    /// Reconnect scheduled after `delay`
    Reconnecting {
        shard_id: u32,
        attempt: u32,
        delay: Duration,
    },
    /// Stopped cleanly; will not reconnect on its own
    Disconnected {
        shard_id: u32,
        code: Option<u16>,
        reason: String,
    },
    Error { shard_id: u32, error: GatewayError },
    /// Torn down; `requested` is false when the shard died on its own
    Destroyed { shard_id: u32, requested: bool },
}

impl ShardEvent {
    /// Shard that emitted this event
    #[must_use]
    pub const fn shard_id(&self) -> u32 {
        match self {
            Self::Connecting { shard_id, .. }
            | Self::Connected { shard_id }
            | Self::Ready { shard_id, .. }
            | Self::Resumed { shard_id, .. }
            | Self::Reconnecting { shard_id, .. }
            | Self::Disconnected { shard_id, .. }
            | Self::Error { shard_id, .. }
            | Self::Destroyed { shard_id, .. } => *shard_id,
            Self::Dispatch(event) => event.shard_id,
        }
    }

    /// Short name used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::Ready { .. } => "ready",
            Self::Resumed { .. } => "resumed",
            Self::Dispatch(_) => "dispatch",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Disconnected { .. } => "disconnected",
            Self::Error { .. } => "error",
            Self::Destroyed { .. } => "destroyed",
        }
    }
}
