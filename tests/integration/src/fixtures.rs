//! Test fixtures and payload generators
//!
//! Provides the JSON bodies both fake servers answer with.

use serde_json::{json, Value};

/// Token every test client authenticates with
pub const TEST_TOKEN: &str = "test-token";

/// Id of the single guild READY lists for `shard_id`
pub fn guild_for_shard(shard_id: u32) -> u64 {
    100 + u64::from(shard_id)
}

/// Session id handed out for `shard_id`
pub fn session_for_shard(shard_id: u32) -> String {
    format!("session-{shard_id}")
}

/// READY payload for `shard` (`[shard_id, total_shards]`)
pub fn ready_payload(shard: [u32; 2], resume_gateway_url: &str) -> Value {
    json!({
        "v": 10,
        "user": {"id": "1", "username": "integration-bot", "bot": true},
        "guilds": [{"id": guild_for_shard(shard[0]).to_string(), "unavailable": true}],
        "session_id": session_for_shard(shard[0]),
        "resume_gateway_url": resume_gateway_url,
        "shard": shard,
    })
}

/// `GET /gateway/bot` body
pub fn gateway_bot_body(url: &str, shards: u32) -> Value {
    json!({
        "url": url,
        "shards": shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": 999,
            "reset_after": 14_400_000,
            "max_concurrency": 1,
        },
    })
}

/// Message object echoed back by `POST /channels/{id}/messages`
pub fn message_body(channel_id: &str, id: u64, content: &str) -> Value {
    json!({
        "id": id.to_string(),
        "channel_id": channel_id,
        "content": content,
    })
}

/// Rate-limit error body
pub fn rate_limited_body(retry_after: f64, global: bool) -> Value {
    json!({
        "message": "You are being rate limited.",
        "retry_after": retry_after,
        "global": global,
    })
}
