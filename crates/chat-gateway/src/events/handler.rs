//! Event handler trait and dispatch table

use super::{DispatchEvent, ShardEvent};
use crate::error::GatewayError;
use async_trait::async_trait;
use chat_core::Snowflake;
use std::time::Duration;
use tokio::sync::mpsc;

/// Receives shard notifications
///
/// Every method has a no-op default so implementors only override what they need.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_connecting(&self, _shard_id: u32, _url: &str) {}

    async fn on_connected(&self, _shard_id: u32) {}

    async fn on_ready(&self, _shard_id: u32, _session_id: &str, _guilds: &[Snowflake]) {}

    async fn on_resumed(&self, _shard_id: u32, _replayed: u64) {}

    async fn on_dispatch(&self, _event: DispatchEvent) {}

    async fn on_reconnecting(&self, _shard_id: u32, _attempt: u32, _delay: Duration) {}

    async fn on_disconnected(&self, _shard_id: u32, _code: Option<u16>, _reason: &str) {}

    async fn on_error(&self, _shard_id: u32, _error: GatewayError) {}

    async fn on_destroyed(&self, _shard_id: u32, _requested: bool) {}
}

/// Route one event to the matching handler method
pub async fn dispatch_event<H>(handler: &H, event: ShardEvent)
where
    H: EventHandler + ?Sized,
{
    match event {
        ShardEvent::Connecting { shard_id, url } => handler.on_connecting(shard_id, &url).await,
        ShardEvent::Connected { shard_id } => handler.on_connected(shard_id).await,
        ShardEvent::Ready {
            shard_id,
            session_id,
            guilds,
        } => handler.on_ready(shard_id, &session_id, &guilds).await,
        ShardEvent::Resumed { shard_id, replayed } => handler.on_resumed(shard_id, replayed).await,
        ShardEvent::Dispatch(event) => handler.on_dispatch(event).await,
        ShardEvent::Reconnecting {
            shard_id,
            attempt,
            delay,
        } => handler.on_reconnecting(shard_id, attempt, delay).await,
        ShardEvent::Disconnected {
            shard_id,
            code,
            reason,
        } => handler.on_disconnected(shard_id, code, &reason).await,
        ShardEvent::Error { shard_id, error } => handler.on_error(shard_id, error).await,
        ShardEvent::Destroyed {
            shard_id,
            requested,
        } => handler.on_destroyed(shard_id, requested).await,
    }
}

/// Drain a shard event stream into a handler until every sender is gone
pub async fn run_event_loop<H>(mut events: mpsc::UnboundedReceiver<ShardEvent>, handler: &H)
where
    H: EventHandler + ?Sized,
{
    while let Some(event) = events.recv().await {
        dispatch_event(handler, event).await;
    }
}
