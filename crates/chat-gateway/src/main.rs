//! Chat gateway client entry point
//!
//! Run with:
//! ```bash
//! CHAT_TOKEN=... cargo run -p chat-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use anyhow::Context;
use async_trait::async_trait;
use chat_common::{try_init_tracing, ClientConfig, TracingConfig};
use chat_core::Snowflake;
use chat_gateway::events::run_event_loop;
use chat_gateway::{
    ConnectionManager, DispatchEvent, EventHandler, GatewayError, TungsteniteConnector,
};
use chat_rest::RestClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Logs every shard notification
struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn on_connecting(&self, shard_id: u32, url: &str) {
        debug!(shard_id, url, "Connecting");
    }

    async fn on_ready(&self, shard_id: u32, session_id: &str, guilds: &[Snowflake]) {
        info!(shard_id, session_id, guilds = guilds.len(), "Shard ready");
    }

    async fn on_resumed(&self, shard_id: u32, replayed: u64) {
        info!(shard_id, replayed, "Shard resumed");
    }

    async fn on_dispatch(&self, event: DispatchEvent) {
        debug!(
            shard_id = event.shard_id,
            sequence = event.sequence,
            event = %event.name,
            "Dispatch"
        );
    }

    async fn on_reconnecting(&self, shard_id: u32, attempt: u32, delay: Duration) {
        warn!(shard_id, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
    }

    async fn on_disconnected(&self, shard_id: u32, code: Option<u16>, reason: &str) {
        info!(shard_id, code = ?code, reason, "Disconnected");
    }

    async fn on_error(&self, shard_id: u32, error: GatewayError) {
        error!(shard_id, error = %error, "Shard error");
    }

    async fn on_destroyed(&self, shard_id: u32, requested: bool) {
        info!(shard_id, requested, "Shard destroyed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("Failed to load configuration")?;

    if let Err(e) = try_init_tracing(TracingConfig::for_debug(config.debug)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        gateway = %config.gateway.url,
        version = config.gateway.version,
        "Starting chat gateway client"
    );

    let rest = RestClient::new(&config.token, config.rest.clone())
        .context("Failed to build REST client")?;

    let mut gateway = config.gateway.clone();
    let total_shards = match gateway.shard_count {
        Some(count) => count,
        None => {
            let bot = rest
                .gateway_bot()
                .await
                .context("Failed to fetch recommended shard count")?;
            info!(
                shards = bot.shards,
                remaining_sessions = bot.session_start_limit.remaining,
                "Using recommended shard count"
            );
            if !bot.url.is_empty() {
                gateway.url = bot.url;
            }
            bot.shards.max(1)
        }
    };
    let shard_ids = gateway.shard_ids.clone();

    let connector = Arc::new(TungsteniteConnector::default());
    let (manager, events) = ConnectionManager::new(config.token.as_str(), gateway, connector);

    let events_task = tokio::spawn(async move {
        run_event_loop(events, &LoggingHandler).await;
    });

    let spawner = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.spawn(total_shards, shard_ids).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let stats = manager.stats();
    manager.destroy().await;
    match spawner.await {
        Ok(Ok(())) | Ok(Err(GatewayError::Destroyed)) => {}
        Ok(Err(e)) => warn!(error = %e, "Shard spawning failed"),
        Err(e) => warn!(error = %e, "Spawn task panicked"),
    }

    info!(shards = stats.total, uptime_secs = stats.uptime.as_secs(), "Gateway client stopped");

    rest.shutdown();
    drop(manager);
    events_task.abort();
    Ok(())
}
