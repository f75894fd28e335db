//! Test helpers for integration tests
//!
//! Configuration presets tuned for local servers and a waiter for shard events.

use anyhow::{bail, Result};
use chat_common::{BackoffConfig, GatewayConfig, RestConfig};
use chat_gateway::{ConnectionManager, ShardEvent, TungsteniteConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use crate::fixtures::TEST_TOKEN;

/// Upper bound for any single event to show up
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway settings with short delays so reconnects finish quickly
pub fn gateway_config(url: &str) -> GatewayConfig {
    GatewayConfig {
        url: url.to_string(),
        spawn_delay: Duration::from_millis(300),
        max_reconnect_attempts: 3,
        backoff: BackoffConfig {
            base: Duration::from_millis(50),
            cap: Duration::from_millis(200),
            jitter: 0.0,
        },
        ..GatewayConfig::default()
    }
}

/// REST settings pointing at `base_url` with the global limiter off
pub fn rest_config(base_url: &str) -> RestConfig {
    RestConfig {
        base_url: base_url.to_string(),
        request_timeout: Duration::from_secs(5),
        global_requests_per_second: None,
        ..RestConfig::default()
    }
}

/// Manager that dials real sockets
pub fn manager(
    config: GatewayConfig,
) -> (Arc<ConnectionManager>, UnboundedReceiver<ShardEvent>) {
    ConnectionManager::new(TEST_TOKEN, config, Arc::new(TungsteniteConnector::default()))
}

/// Wait for the first event matching `matches`, discarding the rest
pub async fn wait_for<F>(
    events: &mut UnboundedReceiver<ShardEvent>,
    mut matches: F,
) -> Result<ShardEvent>
where
    F: FnMut(&ShardEvent) -> bool,
{
    let wait = async {
        while let Some(event) = events.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    };

    match timeout(EVENT_TIMEOUT, wait).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => bail!("event channel closed"),
        Err(_) => bail!("no matching event within {EVENT_TIMEOUT:?}"),
    }
}
