//! Event payload definitions
//!
//! Only the dispatch payloads the connection engine reads itself are typed here;
//! everything else is forwarded as raw JSON.

use chat_core::Snowflake;
use serde::{Deserialize, Serialize};

/// READY event payload
///
/// Sent after successful Identify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway protocol version
    pub v: u8,

    /// Current user
    pub user: CurrentUser,

    /// Guilds owned by this shard (initially unavailable)
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,

    /// Session ID for resuming
    pub session_id: String,

    /// Gateway URL for resuming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_gateway_url: Option<String>,

    /// `[shard_id, total_shards]` echoed back by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

/// Unavailable guild stub (READY guild list, GUILD_DELETE)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<bool>,
}

impl UnavailableGuild {
    #[must_use]
    pub fn new(id: Snowflake) -> Self {
        Self {
            id,
            unavailable: Some(true),
        }
    }

    /// `true` for an outage, `false`/absent when the user actually left the guild
    #[must_use]
    pub fn is_outage(&self) -> bool {
        self.unavailable.unwrap_or(false)
    }
}

/// GUILD_CREATE payload; only the id is read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildIdPayload {
    pub id: Snowflake,
}

/// Current user included in READY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}
