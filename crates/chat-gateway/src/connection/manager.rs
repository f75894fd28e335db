//! Connection manager
//!
//! Owns every shard of the client, keyed by shard id in a `DashMap`. Shards are
//! started strictly one after another with a fixed delay between them.

use super::backoff::reconnect_delay;
use super::connection::{Connection, ConnectionContext};
use super::state::ConnectionStatus;
use crate::error::GatewayError;
use crate::events::ShardEvent;
use crate::protocol::GatewayMessage;
use crate::transport::GatewayConnector;
use chat_common::GatewayConfig;
use chat_core::Snowflake;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Shard owning `id` for a given shard count
///
/// `(id >> 22) % total_shards`; a count of zero maps everything to shard 0.
#[must_use]
pub fn route(id: Snowflake, total_shards: u32) -> u32 {
    id.shard_id(total_shards)
}

/// Aggregate health of all shards
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerStats {
    pub total: usize,
    /// Shards whose handshake was accepted (Connected or Ready)
    pub connected: usize,
    pub ready: usize,
    pub reconnecting: usize,
    /// Shards that stopped (Disconnected or Destroyed)
    pub disconnected: usize,
    /// Distinct guilds across all shards
    pub guilds: usize,
    /// Mean latency over connected shards that have measured one
    pub average_latency: Option<Duration>,
    pub uptime: Duration,
}

/// Manages all shards of one client
pub struct ConnectionManager {
    token: Arc<str>,
    config: Arc<GatewayConfig>,
    connector: Arc<dyn GatewayConnector>,

    /// Shards by id
    connections: DashMap<u32, Arc<Connection>>,

    total_shards: AtomicU32,

    /// Feeds the event forwarder
    events: mpsc::UnboundedSender<ShardEvent>,

    /// Serializes shard starts; holds the time of the last one
    last_spawn: tokio::sync::Mutex<Option<Instant>>,

    /// Pending auto-respawns by shard id
    respawns: DashMap<u32, JoinHandle<()>>,
    respawn_attempts: DashMap<u32, u32>,

    destroyed: AtomicBool,
    shutdown: watch::Sender<bool>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
}

impl ConnectionManager {
    /// Create a manager and the receiver for every shard's events
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        token: impl Into<Arc<str>>,
        config: GatewayConfig,
        connector: Arc<dyn GatewayConnector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ShardEvent>) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let manager = Arc::new(Self {
            token: token.into(),
            config: Arc::new(config),
            connector,
            connections: DashMap::new(),
            total_shards: AtomicU32::new(0),
            events: events_tx,
            last_spawn: tokio::sync::Mutex::new(None),
            respawns: DashMap::new(),
            respawn_attempts: DashMap::new(),
            destroyed: AtomicBool::new(false),
            shutdown,
            forwarder: Mutex::new(None),
            started_at: Instant::now(),
        });

        let weak = Arc::downgrade(&manager);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if let Some(manager) = weak.upgrade() {
                    manager.observe(&event);
                }
                // Keep observing even if nobody listens
                let _ = out_tx.send(event);
            }
        });
        *manager.forwarder.lock() = Some(forwarder);

        (manager, out_rx)
    }

    /// Start `total_shards` shards, or only `shard_ids` when given
    ///
    /// Shards are started in order, `spawn_delay` apart. Returns once the last
    /// shard has begun connecting.
    pub async fn spawn(
        self: &Arc<Self>,
        total_shards: u32,
        shard_ids: Option<Vec<u32>>,
    ) -> Result<(), GatewayError> {
        if self.is_destroyed() {
            return Err(GatewayError::Destroyed);
        }
        if total_shards == 0 {
            return Err(GatewayError::InvalidShardCount(total_shards));
        }

        let ids = shard_ids.unwrap_or_else(|| (0..total_shards).collect());
        if let Some(&shard_id) = ids.iter().find(|&&id| id >= total_shards) {
            return Err(GatewayError::InvalidShard {
                shard_id,
                total_shards,
            });
        }

        self.total_shards.store(total_shards, Ordering::SeqCst);
        info!(total_shards, shards = ids.len(), "Spawning shards");

        let mut queue: VecDeque<u32> = ids.into();
        while let Some(shard_id) = queue.pop_front() {
            self.spawn_one(shard_id).await?;
        }

        Ok(())
    }

    /// Create and start one shard, waiting for its slot first
    async fn spawn_one(&self, shard_id: u32) -> Result<(), GatewayError> {
        let mut last_spawn = self.last_spawn.lock().await;

        if let Some(last) = *last_spawn {
            let ready_at = last + self.config.spawn_delay;
            if ready_at > Instant::now() {
                debug!(
                    shard_id,
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Waiting for spawn slot"
                );
                self.wait_until(ready_at).await?;
            }
        }
        if self.is_destroyed() {
            return Err(GatewayError::Destroyed);
        }

        let connection = Arc::new(Connection::new(
            shard_id,
            self.total_shards(),
            self.context(),
        )?);

        if let Some(previous) = self.connections.insert(shard_id, Arc::clone(&connection)) {
            previous.destroy().await;
        }

        connection.connect()?;
        *last_spawn = Some(Instant::now());
        info!(shard_id, "Shard spawned");
        Ok(())
    }

    /// Sleep until `deadline` unless the manager is destroyed first
    async fn wait_until(&self, deadline: Instant) -> Result<(), GatewayError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(GatewayError::Destroyed);
        }
        tokio::select! {
            () = sleep_until(deadline) => Ok(()),
            _ = shutdown.changed() => Err(GatewayError::Destroyed),
        }
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            token: Arc::clone(&self.token),
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            events: self.events.clone(),
        }
    }

    /// Bookkeeping on events passing through the forwarder
    fn observe(self: &Arc<Self>, event: &ShardEvent) {
        match event {
            ShardEvent::Ready { shard_id, .. } | ShardEvent::Resumed { shard_id, .. } => {
                self.respawn_attempts.remove(shard_id);
            }
            ShardEvent::Destroyed {
                shard_id,
                requested: false,
            } if self.config.auto_respawn && !self.is_destroyed() => {
                self.schedule_respawn(*shard_id);
            }
            _ => {}
        }
    }

    fn schedule_respawn(self: &Arc<Self>, shard_id: u32) {
        let attempt = {
            let mut attempts = self.respawn_attempts.entry(shard_id).or_insert(0);
            let attempt = *attempts;
            *attempts += 1;
            attempt
        };

        if attempt >= self.config.max_reconnect_attempts {
            warn!(shard_id, attempts = attempt, "Respawn attempts exhausted");
            return;
        }

        let delay = reconnect_delay(&self.config.backoff, attempt);
        info!(
            shard_id,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Scheduling respawn"
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
            let Some(manager) = weak.upgrade() else {
                return;
            };
            manager.respawns.remove(&shard_id);
            if let Err(e) = manager.spawn_one(shard_id).await {
                warn!(shard_id, error = %e, "Respawn failed");
            }
        });

        if let Some(previous) = self.respawns.insert(shard_id, task) {
            previous.abort();
        }
    }

    /// Total shard count of the last spawn
    pub fn total_shards(&self) -> u32 {
        self.total_shards.load(Ordering::SeqCst)
    }

    /// Shard that owns `id` under the current shard count
    pub fn shard_for(&self, id: Snowflake) -> u32 {
        route(id, self.total_shards())
    }

    pub fn get(&self, shard_id: u32) -> Option<Arc<Connection>> {
        self.connections.get(&shard_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Ids of every managed shard, ascending
    pub fn shard_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Send a client message through one shard
    pub fn send_to(&self, shard_id: u32, message: GatewayMessage) -> Result<(), GatewayError> {
        let connection = self.get(shard_id).ok_or(GatewayError::InvalidShard {
            shard_id,
            total_shards: self.total_shards(),
        })?;
        connection.send(message)
    }

    /// Send a client message through the shard owning `id`
    pub fn route_message(
        &self,
        id: Snowflake,
        message: GatewayMessage,
    ) -> Result<(), GatewayError> {
        self.send_to(self.shard_for(id), message)
    }

    /// Send to every shard able to send; returns how many accepted it
    pub fn broadcast(&self, message: &GatewayMessage) -> usize {
        let connections: Vec<_> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        connections
            .iter()
            .filter(|connection| connection.status().can_send())
            .filter(|connection| connection.send(message.clone()).is_ok())
            .count()
    }

    /// Aggregate counts, guild union, mean latency and uptime
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            total: 0,
            connected: 0,
            ready: 0,
            reconnecting: 0,
            disconnected: 0,
            guilds: 0,
            average_latency: None,
            uptime: self.started_at.elapsed(),
        };

        let mut guilds = HashSet::new();
        let mut latency_sum = Duration::ZERO;
        let mut latency_count = 0u32;

        for entry in &self.connections {
            let state = entry.value().snapshot();
            stats.total += 1;
            match state.status {
                ConnectionStatus::Ready => {
                    stats.ready += 1;
                    stats.connected += 1;
                }
                ConnectionStatus::Connected => stats.connected += 1,
                ConnectionStatus::Reconnecting => stats.reconnecting += 1,
                ConnectionStatus::Disconnected | ConnectionStatus::Destroyed => {
                    stats.disconnected += 1;
                }
                _ => {}
            }
            if state.status.is_connected() {
                if let Some(latency) = state.latency {
                    latency_sum += latency;
                    latency_count += 1;
                }
            }
            guilds.extend(state.guilds);
        }

        stats.guilds = guilds.len();
        if latency_count > 0 {
            stats.average_latency = Some(latency_sum / latency_count);
        }
        stats
    }

    /// Tear down every shard and stop pending spawns and respawns
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        for entry in &self.respawns {
            entry.value().abort();
        }
        self.respawns.clear();

        let connections: Vec<_> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        join_all(connections.iter().map(|connection| connection.destroy())).await;

        self.connections.clear();
        self.respawn_attempts.clear();
        info!(shards = connections.len(), "Connection manager destroyed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for entry in &self.respawns {
            entry.value().abort();
        }
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("total_shards", &self.total_shards())
            .field("shards", &self.shard_ids())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
