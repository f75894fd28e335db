//! Shard connection
//!
//! A [`Connection`] is a cheap handle; the protocol state machine runs in a
//! spawned actor that owns the socket, the heartbeat timer and the backoff
//! timer. Commands, heartbeat signals and inbound frames are handled one at a
//! time by that actor, so a shard never has two transitions in flight.

use super::backoff::reconnect_delay;
use super::heartbeat::{HeartbeatSignal, HeartbeatTimer};
use super::state::{ConnectionState, ConnectionStatus};
use crate::error::GatewayError;
use crate::events::{
    DispatchEvent, GatewayEventType, GuildIdPayload, ReadyEvent, ShardEvent, UnavailableGuild,
};
use crate::protocol::{
    CloseAction, CloseCode, GatewayMessage, IdentifyPayload, OpCode, PresenceUpdatePayload,
    RequestGuildMembersPayload, ResumePayload,
};
use crate::transport::{Frame, FrameSink, FrameStream, GatewayConnector, GatewaySocket};
use chat_common::GatewayConfig;
use chat_core::Snowflake;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, trace, warn};

/// Upper bound on the wait between socket open and Hello
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(20);

/// Upper bound on writing a close frame during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Local close code that keeps the server-side session resumable
const RESUMABLE_CLOSE: u16 = 4000;

/// Normal closure; the server discards the session
const NORMAL_CLOSE: u16 = 1000;

/// Everything a connection needs from its owner
#[derive(Clone)]
pub struct ConnectionContext {
    pub token: Arc<str>,
    pub config: Arc<GatewayConfig>,
    pub connector: Arc<dyn GatewayConnector>,
    pub events: mpsc::UnboundedSender<ShardEvent>,
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("token", &"<redacted>")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum Command {
    Send(GatewayMessage),
    Disconnect(oneshot::Sender<()>),
    Destroy(oneshot::Sender<()>),
}

enum Stop {
    Disconnect(Option<oneshot::Sender<()>>),
    Destroy(Option<oneshot::Sender<()>>),
}

enum SessionEnd {
    Reconnect {
        resume: bool,
        code: Option<u16>,
        reason: String,
    },
    Fatal(CloseCode),
    Stop(Stop),
}

enum Backoff {
    Retry,
    Stop(Stop),
    /// Attempts exhausted; terminal status already reported
    GiveUp,
}

impl SessionEnd {
    fn reconnect(resume: bool, reason: impl Into<String>) -> Self {
        Self::Reconnect {
            resume,
            code: None,
            reason: reason.into(),
        }
    }
}

/// Handle to one shard
pub struct Connection {
    shard_id: u32,
    state: Arc<RwLock<ConnectionState>>,
    context: ConnectionContext,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create an idle connection for `shard_id` of `total_shards`
    pub fn new(
        shard_id: u32,
        total_shards: u32,
        context: ConnectionContext,
    ) -> Result<Self, GatewayError> {
        if total_shards == 0 {
            return Err(GatewayError::InvalidShardCount(total_shards));
        }
        if shard_id >= total_shards {
            return Err(GatewayError::InvalidShard {
                shard_id,
                total_shards,
            });
        }

        Ok(Self {
            shard_id,
            state: Arc::new(RwLock::new(ConnectionState::new(shard_id, total_shards))),
            context,
            commands: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Start the connect sequence in the background
    ///
    /// No-op if the connection is already running.
    pub fn connect(&self) -> Result<(), GatewayError> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        {
            let mut state = self.state.write();
            if state.status == ConnectionStatus::Destroyed {
                return Err(GatewayError::Destroyed);
            }
            state.reconnect_attempts = 0;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let runner = ShardRunner {
            shard_id: self.shard_id,
            state: Arc::clone(&self.state),
            context: self.context.clone(),
            commands: rx,
            resuming: false,
            replayed: 0,
        };

        *self.commands.lock() = Some(tx);
        *task = Some(tokio::spawn(runner.run()));
        Ok(())
    }

    /// Current lifecycle status
    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    /// Copy of the full state
    pub fn snapshot(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub fn latency(&self) -> Option<Duration> {
        self.state.read().latency
    }

    pub fn sequence(&self) -> Option<u64> {
        self.state.read().sequence
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.read().session_id.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state.read().reconnect_attempts
    }

    /// Guilds currently owned by this shard
    pub fn guilds(&self) -> Vec<Snowflake> {
        self.state.read().guilds.iter().copied().collect()
    }

    pub fn owns_guild(&self, guild_id: Snowflake) -> bool {
        self.state.read().guilds.contains(&guild_id)
    }

    /// Queue a client message for sending
    pub fn send(&self, message: GatewayMessage) -> Result<(), GatewayError> {
        if !message.op.is_client_op() {
            return Err(GatewayError::UnsupportedOpcode(message.op));
        }
        if !self.status().can_send() {
            return Err(GatewayError::NotConnected);
        }
        self.command(Command::Send(message))
    }

    pub fn update_presence(&self, presence: &PresenceUpdatePayload) -> Result<(), GatewayError> {
        self.send(GatewayMessage::presence_update(presence)?)
    }

    pub fn request_guild_members(
        &self,
        request: &RequestGuildMembersPayload,
    ) -> Result<(), GatewayError> {
        self.send(GatewayMessage::request_guild_members(request)?)
    }

    /// Close cleanly and stop; the session is discarded
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command(Command::Disconnect(ack_tx)).is_ok() && ack_rx.await.is_ok() {
            self.join().await;
            return;
        }

        let mut state = self.state.write();
        if !state.status.is_terminal() {
            state.status = ConnectionStatus::Disconnected;
            state.clear_session();
        }
    }

    /// Close and tear down for good
    pub async fn destroy(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command(Command::Destroy(ack_tx)).is_ok() && ack_rx.await.is_ok() {
            self.join().await;
            return;
        }

        {
            let mut state = self.state.write();
            if state.status == ConnectionStatus::Destroyed {
                return;
            }
            state.status = ConnectionStatus::Destroyed;
            state.clear_session();
        }
        let _ = self.context.events.send(ShardEvent::Destroyed {
            shard_id: self.shard_id,
            requested: true,
        });
    }

    fn command(&self, command: Command) -> Result<(), GatewayError> {
        self.commands
            .lock()
            .as_ref()
            .ok_or(GatewayError::NotConnected)?
            .send(command)
            .map_err(|_| GatewayError::ChannelClosed)
    }

    async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Connection")
            .field("shard_id", &self.shard_id)
            .field("status", &state.status)
            .field("sequence", &state.sequence)
            .finish()
    }
}

/// The connection actor
struct ShardRunner {
    shard_id: u32,
    state: Arc<RwLock<ConnectionState>>,
    context: ConnectionContext,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Resume sent, RESUMED not yet received
    resuming: bool,
    /// Dispatches received while resuming
    replayed: u64,
}

impl ShardRunner {
    async fn run(mut self) {
        loop {
            match self.run_session().await {
                SessionEnd::Stop(stop) => {
                    self.finish(stop);
                    return;
                }
                SessionEnd::Fatal(code) => {
                    error!(
                        shard_id = self.shard_id,
                        code = code.as_u16(),
                        "Fatal close: {}",
                        code.description()
                    );
                    self.set_status(ConnectionStatus::Destroyed);
                    self.emit(ShardEvent::Error {
                        shard_id: self.shard_id,
                        error: GatewayError::FatalClose(code),
                    });
                    self.emit(ShardEvent::Destroyed {
                        shard_id: self.shard_id,
                        requested: false,
                    });
                    return;
                }
                SessionEnd::Reconnect {
                    resume,
                    code,
                    reason,
                } => {
                    if !resume {
                        self.state.write().clear_session();
                    }
                    match self.schedule_reconnect(code, reason).await {
                        Backoff::Retry => {}
                        Backoff::Stop(stop) => {
                            self.finish(stop);
                            return;
                        }
                        Backoff::GiveUp => return,
                    }
                }
            }
        }
    }

    /// Wait out the backoff delay, or give up once the attempt budget is spent
    async fn schedule_reconnect(&mut self, code: Option<u16>, reason: String) -> Backoff {
        let config = Arc::clone(&self.context.config);
        let attempt = self.state.read().reconnect_attempts;

        if attempt >= config.max_reconnect_attempts {
            warn!(shard_id = self.shard_id, attempts = attempt, "Reconnect attempts exhausted");
            self.emit(ShardEvent::Error {
                shard_id: self.shard_id,
                error: GatewayError::ReconnectExhausted {
                    shard_id: self.shard_id,
                    attempts: attempt,
                },
            });

            if config.exhausted_is_fatal {
                self.set_status(ConnectionStatus::Destroyed);
                self.emit(ShardEvent::Destroyed {
                    shard_id: self.shard_id,
                    requested: false,
                });
            } else {
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(ShardEvent::Disconnected {
                    shard_id: self.shard_id,
                    code,
                    reason,
                });
            }
            return Backoff::GiveUp;
        }

        let delay = reconnect_delay(&config.backoff, attempt);
        {
            let mut state = self.state.write();
            state.reconnect_attempts = attempt + 1;
            state.status = ConnectionStatus::Reconnecting;
            state.latency = None;
        }
        info!(
            shard_id = self.shard_id,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            code = ?code,
            reason = %reason,
            "Reconnecting"
        );
        self.emit(ShardEvent::Reconnecting {
            shard_id: self.shard_id,
            attempt: attempt + 1,
            delay,
        });

        tokio::select! {
            () = sleep(delay) => Backoff::Retry,
            stop = self.next_stop() => Backoff::Stop(stop),
        }
    }

    async fn run_session(&mut self) -> SessionEnd {
        let config = Arc::clone(&self.context.config);
        let (url, resume) = {
            let state = self.state.read();
            let resume = state.resumable_session().is_some();
            let base = match (&state.resume_url, resume) {
                (Some(resume_url), true) => resume_url.as_str(),
                _ => config.url.as_str(),
            };
            (config.connect_url(base), resume)
        };

        self.set_status(ConnectionStatus::Connecting);
        info!(shard_id = self.shard_id, url = %url, resume, "Connecting");
        self.emit(ShardEvent::Connecting {
            shard_id: self.shard_id,
            url: url.clone(),
        });

        let connector = Arc::clone(&self.context.connector);
        let socket = tokio::select! {
            result = connector.connect(&url) => match result {
                Ok(socket) => socket,
                Err(e) => {
                    warn!(shard_id = self.shard_id, error = %e, "Connect failed");
                    let reason = e.to_string();
                    self.emit(ShardEvent::Error { shard_id: self.shard_id, error: e });
                    return SessionEnd::reconnect(true, reason);
                }
            },
            stop = self.next_stop() => return SessionEnd::Stop(stop),
        };

        let GatewaySocket {
            mut sink,
            mut stream,
        } = socket;

        let end = self.drive(&mut sink, &mut stream, resume).await;

        match &end {
            SessionEnd::Stop(_) => close_socket(&mut sink, NORMAL_CLOSE, "client shutdown").await,
            SessionEnd::Reconnect { .. } => {
                close_socket(&mut sink, RESUMABLE_CLOSE, "reconnecting").await;
            }
            SessionEnd::Fatal(_) => {
                let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
            }
        }
        end
    }

    /// Hello, handshake, then the per-frame loop of one socket
    async fn drive(
        &mut self,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        resume: bool,
    ) -> SessionEnd {
        self.set_status(ConnectionStatus::AwaitingHello);

        let interval = tokio::select! {
            hello = timeout(HELLO_TIMEOUT, await_hello(self.shard_id, stream)) => match hello {
                Ok(Ok(interval)) => interval,
                Ok(Err(end)) => return end,
                Err(_) => {
                    warn!(shard_id = self.shard_id, "No hello received");
                    self.emit(ShardEvent::Error {
                        shard_id: self.shard_id,
                        error: GatewayError::HelloTimeout(HELLO_TIMEOUT),
                    });
                    return SessionEnd::reconnect(true, "hello timeout");
                }
            },
            stop = self.next_stop() => return SessionEnd::Stop(stop),
        };

        debug!(
            shard_id = self.shard_id,
            interval_ms = interval.as_millis() as u64,
            "Hello received"
        );

        let (beat_tx, mut beats) = mpsc::unbounded_channel();
        let mut heartbeat = HeartbeatTimer::start(interval, beat_tx);

        self.set_status(ConnectionStatus::Handshaking);
        if let Err(e) = self.handshake(sink, resume).await {
            warn!(shard_id = self.shard_id, error = %e, "Handshake write failed");
            return SessionEnd::reconnect(true, e.to_string());
        }

        let end = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = write(sink, &message).await {
                            break SessionEnd::reconnect(true, e.to_string());
                        }
                    }
                    Some(Command::Disconnect(ack)) => {
                        break SessionEnd::Stop(Stop::Disconnect(Some(ack)));
                    }
                    Some(Command::Destroy(ack)) => break SessionEnd::Stop(Stop::Destroy(Some(ack))),
                    None => break SessionEnd::Stop(Stop::Destroy(None)),
                },
                signal = beats.recv() => match signal {
                    Some(HeartbeatSignal::Beat) => {
                        if let Err(e) = self.send_heartbeat(sink).await {
                            break SessionEnd::reconnect(true, e.to_string());
                        }
                    }
                    Some(HeartbeatSignal::Missed) | None => {
                        warn!(shard_id = self.shard_id, "Heartbeat not acknowledged, reconnecting");
                        break SessionEnd::reconnect(true, "heartbeat ack missed");
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        if let Some(end) = self.handle_text(&text, sink, &heartbeat).await {
                            break end;
                        }
                    }
                    Some(Ok(Frame::Close { code, reason })) => {
                        break self.classify_close(code, reason);
                    }
                    Some(Err(e)) => {
                        warn!(shard_id = self.shard_id, error = %e, "Socket read failed");
                        break SessionEnd::reconnect(true, e.to_string());
                    }
                    None => {
                        warn!(shard_id = self.shard_id, "Socket closed without close frame");
                        break SessionEnd::reconnect(true, "stream ended");
                    }
                },
            }
        };

        heartbeat.stop();
        self.resuming = false;
        end
    }

    async fn handshake(&mut self, sink: &mut FrameSink, resume: bool) -> Result<(), GatewayError> {
        let config = Arc::clone(&self.context.config);
        let token = self.context.token.to_string();

        let resume_payload = if resume {
            let state = self.state.read();
            state.resumable_session().map(|(session_id, seq)| ResumePayload {
                token: token.clone(),
                session_id: session_id.to_string(),
                seq,
            })
        } else {
            None
        };

        let message = if let Some(payload) = resume_payload {
            info!(shard_id = self.shard_id, seq = payload.seq, "Resuming session");
            self.resuming = true;
            self.replayed = 0;
            GatewayMessage::resume(&payload)?
        } else {
            let total_shards = self.state.read().total_shards;
            info!(shard_id = self.shard_id, total_shards, "Identifying");
            GatewayMessage::identify(&IdentifyPayload {
                token,
                properties: (&config.properties).into(),
                intents: config.intents,
                shard: Some([self.shard_id, total_shards]),
                large_threshold: Some(config.large_threshold),
                compress: false,
                presence: None,
            })?
        };

        write(sink, &message).await
    }

    async fn send_heartbeat(&mut self, sink: &mut FrameSink) -> Result<(), GatewayError> {
        let sequence = {
            let mut state = self.state.write();
            state.last_heartbeat_sent = Some(Instant::now());
            state.sequence
        };
        trace!(shard_id = self.shard_id, sequence = ?sequence, "Sending heartbeat");
        write(sink, &GatewayMessage::heartbeat(sequence)).await
    }

    async fn handle_text(
        &mut self,
        text: &str,
        sink: &mut FrameSink,
        heartbeat: &HeartbeatTimer,
    ) -> Option<SessionEnd> {
        let message = match GatewayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(shard_id = self.shard_id, error = %e, "Dropping malformed gateway message");
                return None;
            }
        };

        match message.op {
            OpCode::Dispatch => {
                self.handle_dispatch(message);
                None
            }
            OpCode::Heartbeat => {
                debug!(shard_id = self.shard_id, "Server requested heartbeat");
                heartbeat.record_sent();
                self.send_heartbeat(sink)
                    .await
                    .err()
                    .map(|e| SessionEnd::reconnect(true, e.to_string()))
            }
            OpCode::HeartbeatAck => {
                let latency = heartbeat.acknowledge();
                let mut state = self.state.write();
                state.latency = latency;
                state.last_heartbeat_ack = Some(Instant::now());
                trace!(shard_id = self.shard_id, latency = ?latency, "Heartbeat acknowledged");
                None
            }
            OpCode::Reconnect => {
                info!(shard_id = self.shard_id, "Server requested reconnect");
                Some(SessionEnd::reconnect(true, "server requested reconnect"))
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                warn!(shard_id = self.shard_id, resumable, "Session invalidated");
                Some(SessionEnd::reconnect(resumable, "invalid session"))
            }
            OpCode::Hello => {
                debug!(shard_id = self.shard_id, "Ignoring repeated hello");
                None
            }
            op => {
                debug!(shard_id = self.shard_id, op = %op, "Ignoring client op code from server");
                None
            }
        }
    }

    fn handle_dispatch(&mut self, message: GatewayMessage) {
        let (Some(name), Some(sequence)) = (message.t, message.s) else {
            warn!(shard_id = self.shard_id, "Dropping dispatch without event name or sequence");
            return;
        };

        let connected = {
            let mut state = self.state.write();
            if !state.observe_sequence(sequence) {
                debug!(
                    shard_id = self.shard_id,
                    sequence,
                    current = ?state.sequence,
                    "Stale sequence ignored"
                );
            }
            if state.status == ConnectionStatus::Handshaking {
                state.status = ConnectionStatus::Connected;
                true
            } else {
                false
            }
        };
        if connected {
            self.emit(ShardEvent::Connected {
                shard_id: self.shard_id,
            });
        }

        let kind = GatewayEventType::from_name(&name);
        if self.resuming && kind != Some(GatewayEventType::Resumed) {
            self.replayed += 1;
        }

        match kind {
            Some(GatewayEventType::Ready) => self.on_ready(&message.d),
            Some(GatewayEventType::Resumed) => self.on_resumed(),
            Some(GatewayEventType::GuildCreate) => {
                if let Ok(guild) = GuildIdPayload::deserialize(&message.d) {
                    self.state.write().guilds.insert(guild.id);
                }
            }
            Some(GatewayEventType::GuildDelete) => {
                if let Ok(guild) = UnavailableGuild::deserialize(&message.d) {
                    if !guild.is_outage() {
                        self.state.write().guilds.remove(&guild.id);
                    }
                }
            }
            _ => {}
        }

        trace!(shard_id = self.shard_id, sequence, event = %name, "Dispatch");
        self.emit(ShardEvent::Dispatch(DispatchEvent {
            shard_id: self.shard_id,
            sequence,
            name,
            kind,
            data: message.d,
        }));
    }

    fn on_ready(&mut self, data: &serde_json::Value) {
        let ready = match ReadyEvent::deserialize(data) {
            Ok(ready) => ready,
            Err(e) => {
                warn!(shard_id = self.shard_id, error = %e, "Malformed READY payload");
                return;
            }
        };

        let guilds: Vec<Snowflake> = ready.guilds.iter().map(|g| g.id).collect();
        {
            let mut state = self.state.write();
            state.store_session(ready.session_id.clone(), ready.resume_gateway_url);
            state.guilds = guilds.iter().copied().collect();
            state.status = ConnectionStatus::Ready;
            state.reconnect_attempts = 0;
        }
        self.resuming = false;

        info!(
            shard_id = self.shard_id,
            session_id = %ready.session_id,
            guilds = guilds.len(),
            "Ready"
        );
        self.emit(ShardEvent::Ready {
            shard_id: self.shard_id,
            session_id: ready.session_id,
            guilds,
        });
    }

    fn on_resumed(&mut self) {
        {
            let mut state = self.state.write();
            state.status = ConnectionStatus::Ready;
            state.reconnect_attempts = 0;
        }
        let replayed = std::mem::take(&mut self.replayed);
        self.resuming = false;

        info!(shard_id = self.shard_id, replayed, "Resumed");
        self.emit(ShardEvent::Resumed {
            shard_id: self.shard_id,
            replayed,
        });
    }

    fn classify_close(&self, code: Option<u16>, reason: String) -> SessionEnd {
        match CloseAction::classify(code) {
            CloseAction::Fatal(code) => SessionEnd::Fatal(code),
            CloseAction::Reconnect { resume } => {
                warn!(
                    shard_id = self.shard_id,
                    code = ?code,
                    reason = %reason,
                    resume,
                    "Socket closed by server"
                );
                SessionEnd::Reconnect {
                    resume,
                    code,
                    reason,
                }
            }
        }
    }

    /// Wait for a stop command, dropping sends that arrive while not connected
    async fn next_stop(&mut self) -> Stop {
        loop {
            match self.commands.recv().await {
                Some(Command::Send(message)) => {
                    warn!(
                        shard_id = self.shard_id,
                        op = %message.op,
                        "Dropping message while not connected"
                    );
                }
                Some(Command::Disconnect(ack)) => return Stop::Disconnect(Some(ack)),
                Some(Command::Destroy(ack)) => return Stop::Destroy(Some(ack)),
                None => return Stop::Destroy(None),
            }
        }
    }

    fn finish(&mut self, stop: Stop) {
        match stop {
            Stop::Disconnect(ack) => {
                {
                    let mut state = self.state.write();
                    state.status = ConnectionStatus::Disconnected;
                    state.clear_session();
                    state.latency = None;
                }
                info!(shard_id = self.shard_id, "Disconnected");
                self.emit(ShardEvent::Disconnected {
                    shard_id: self.shard_id,
                    code: Some(NORMAL_CLOSE),
                    reason: "client disconnect".to_string(),
                });
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Stop::Destroy(ack) => {
                {
                    let mut state = self.state.write();
                    state.status = ConnectionStatus::Destroyed;
                    state.clear_session();
                    state.latency = None;
                }
                info!(shard_id = self.shard_id, "Destroyed");
                self.emit(ShardEvent::Destroyed {
                    shard_id: self.shard_id,
                    requested: true,
                });
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.state.write().status = status;
    }

    fn emit(&self, event: ShardEvent) {
        let _ = self.context.events.send(event);
    }
}

/// Read frames until Hello; returns the heartbeat interval
async fn await_hello(shard_id: u32, stream: &mut FrameStream) -> Result<Duration, SessionEnd> {
    loop {
        match stream.next().await {
            Some(Ok(Frame::Text(text))) => match GatewayMessage::from_json(&text) {
                Ok(message) => match message.as_hello() {
                    Some(hello) => return Ok(Duration::from_millis(hello.heartbeat_interval)),
                    None => debug!(shard_id, op = %message.op, "Ignoring message before hello"),
                },
                Err(e) => warn!(shard_id, error = %e, "Dropping malformed gateway message"),
            },
            Some(Ok(Frame::Close { code, reason })) => {
                return Err(match CloseAction::classify(code) {
                    CloseAction::Fatal(code) => SessionEnd::Fatal(code),
                    CloseAction::Reconnect { resume } => SessionEnd::Reconnect {
                        resume,
                        code,
                        reason,
                    },
                });
            }
            Some(Err(e)) => return Err(SessionEnd::reconnect(true, e.to_string())),
            None => return Err(SessionEnd::reconnect(true, "stream ended before hello")),
        }
    }
}

async fn write(sink: &mut FrameSink, message: &GatewayMessage) -> Result<(), GatewayError> {
    let json = message.to_json()?;
    sink.send(Frame::Text(json)).await
}

async fn close_socket(sink: &mut FrameSink, code: u16, reason: &str) {
    let result = timeout(CLOSE_TIMEOUT, async {
        sink.send(Frame::close(code, reason)).await?;
        sink.close().await
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(code, error = %e, "Close frame not delivered"),
        Err(_) => debug!(code, "Close frame timed out"),
    }
}
