//! Gateway event types
//!
//! Names of the dispatch events the connection engine itself reacts to or routes by.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway event types
///
/// These are the event names sent in the `t` field of dispatch messages.
/// Names not listed here are still forwarded, with `kind == None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEventType {
    // Connection events
    /// Sent after successful Identify
    Ready,
    /// Sent after successful Resume
    Resumed,

    // Guild events
    /// Guild available, joined, or created
    GuildCreate,
    /// Guild settings changed
    GuildUpdate,
    /// Left guild, kicked, or guild became unavailable
    GuildDelete,
    /// Chunk of members answering a Request Guild Members
    GuildMembersChunk,

    // Channel events
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,

    // Message events
    MessageCreate,
    MessageUpdate,
    MessageDelete,

    // Presence events
    /// User status changed
    PresenceUpdate,
    /// User started typing
    TypingStart,

    // User events
    /// Current user updated
    UserUpdate,
}

impl GatewayEventType {
    /// Every known event type
    pub const ALL: [Self; 15] = [
        Self::Ready,
        Self::Resumed,
        Self::GuildCreate,
        Self::GuildUpdate,
        Self::GuildDelete,
        Self::GuildMembersChunk,
        Self::ChannelCreate,
        Self::ChannelUpdate,
        Self::ChannelDelete,
        Self::MessageCreate,
        Self::MessageUpdate,
        Self::MessageDelete,
        Self::PresenceUpdate,
        Self::TypingStart,
        Self::UserUpdate,
    ];

    /// Get the string representation of the event type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelUpdate => "CHANNEL_UPDATE",
            Self::ChannelDelete => "CHANNEL_DELETE",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::TypingStart => "TYPING_START",
            Self::UserUpdate => "USER_UPDATE",
        }
    }

    /// Look up an event type by its wire name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Check if this event carries guild membership changes for the shard
    #[must_use]
    pub const fn is_guild_lifecycle(self) -> bool {
        matches!(self, Self::Ready | Self::GuildCreate | Self::GuildDelete)
    }
}

impl fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
