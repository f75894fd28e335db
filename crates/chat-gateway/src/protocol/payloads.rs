//! Payload definitions
//!
//! Defines the `d` payload structures for control messages exchanged with the gateway.

use chat_common::ClientProperties;
use chat_core::{Intents, Snowflake};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    /// Default heartbeat interval (41.25 seconds)
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 41_250;

    /// Create a new Hello payload with default interval
    #[must_use]
    pub fn new() -> Self {
        Self {
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Create a Hello payload with custom interval
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

impl Default for HelloPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload for op 2 (Identify)
///
/// Sent by the client to start a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,

    /// Client connection properties
    pub properties: IdentifyProperties,

    /// Capability flags
    pub intents: Intents,

    /// `[shard_id, total_shards]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,

    /// Member count above which offline members are not sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u16>,

    #[serde(default)]
    pub compress: bool,

    /// Initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdatePayload>,
}

/// Client connection properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,

    /// Library or client name
    pub browser: String,

    /// Device name
    pub device: String,
}

impl From<&ClientProperties> for IdentifyProperties {
    fn from(props: &ClientProperties) -> Self {
        Self {
            os: props.os.clone(),
            browser: props.browser.clone(),
            device: props.device.clone(),
        }
    }
}

/// Payload for op 6 (Resume)
///
/// Sent by the client to resume a dropped session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last sequence number received
    pub seq: u64,
}

/// Payload for op 3 (Presence Update)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    /// Unix time (ms) since the client went idle
    pub since: Option<u64>,

    /// Activities shown for the user
    #[serde(default)]
    pub activities: Vec<Value>,

    /// New status
    pub status: PresenceStatus,

    pub afk: bool,
}

impl PresenceUpdatePayload {
    /// Presence with a status and no activities
    #[must_use]
    pub fn new(status: PresenceStatus) -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status,
            afk: false,
        }
    }
}

/// User presence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    pub guild_id: Snowflake,

    /// Username prefix filter; empty string requests everyone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Maximum number of members (0 means no limit)
    pub limit: u32,

    #[serde(default)]
    pub presences: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,

    /// Echoed back in the resulting member chunks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembersPayload {
    /// Request every member of a guild
    #[must_use]
    pub fn all(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            query: Some(String::new()),
            limit: 0,
            presences: false,
            user_ids: None,
            nonce: None,
        }
    }
}
