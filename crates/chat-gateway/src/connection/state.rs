//! Per-shard connection state
//!
//! Owned by one connection actor; everyone else reads snapshots.

use chat_core::Snowflake;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Connection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Created, not started
    Idle,
    /// Opening the socket
    Connecting,
    /// Socket open, waiting for Hello
    AwaitingHello,
    /// Identify or Resume sent
    Handshaking,
    /// Server accepted the handshake
    Connected,
    /// Session established (READY or RESUMED)
    Ready,
    /// Waiting out a backoff delay
    Reconnecting,
    /// Stopped cleanly; can be started again
    Disconnected,
    /// Torn down for good
    Destroyed,
}

impl ConnectionStatus {
    /// Check if the connection is stopped
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Destroyed)
    }

    /// Check if the server has accepted the handshake
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }

    /// Check if client messages may be written
    #[must_use]
    pub const fn can_send(self) -> bool {
        self.is_connected()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one shard
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub shard_id: u32,
    pub total_shards: u32,
    pub status: ConnectionStatus,
    /// Last dispatch sequence of the current session
    pub sequence: Option<u64>,
    pub session_id: Option<String>,
    /// Address advertised in READY for resuming
    pub resume_url: Option<String>,
    pub last_heartbeat_sent: Option<Instant>,
    pub last_heartbeat_ack: Option<Instant>,
    pub latency: Option<Duration>,
    /// Failed cycles since the last READY/RESUMED
    pub reconnect_attempts: u32,
    /// Guilds owned by this shard
    pub guilds: HashSet<Snowflake>,
}

impl ConnectionState {
    #[must_use]
    pub fn new(shard_id: u32, total_shards: u32) -> Self {
        Self {
            shard_id,
            total_shards,
            status: ConnectionStatus::Idle,
            sequence: None,
            session_id: None,
            resume_url: None,
            last_heartbeat_sent: None,
            last_heartbeat_ack: None,
            latency: None,
            reconnect_attempts: 0,
            guilds: HashSet::new(),
        }
    }

    /// Record a dispatch sequence; never moves backwards
    ///
    /// Returns `false` when `sequence` is older than the stored one.
    pub fn observe_sequence(&mut self, sequence: u64) -> bool {
        match self.sequence {
            Some(current) if sequence < current => false,
            _ => {
                self.sequence = Some(sequence);
                true
            }
        }
    }

    /// Store a new session from READY
    pub fn store_session(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
    }

    /// Abandon the session; the next handshake is a fresh Identify
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.sequence = None;
    }

    /// Session id and sequence, when both are known
    #[must_use]
    pub fn resumable_session(&self) -> Option<(&str, u64)> {
        match (&self.session_id, self.sequence) {
            (Some(session_id), Some(sequence)) => Some((session_id.as_str(), sequence)),
            _ => None,
        }
    }
}
