//! In-memory connector for driving connections from tests

use super::{Frame, GatewayConnector, GatewaySocket};
use crate::error::GatewayError;
use crate::protocol::{GatewayMessage, OpCode};
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Hands every opened socket to the test as a [`MockSession`]
pub(crate) struct MockConnector {
    sessions: mpsc::UnboundedSender<MockSession>,
    refuse: AtomicU32,
    urls: Mutex<Vec<String>>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSession>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sessions: tx,
            refuse: AtomicU32::new(0),
            urls: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    /// Fail the next `count` connect attempts
    pub(crate) fn refuse_next(&self, count: u32) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Every URL passed to `connect`, in order
    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl GatewayConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<GatewaySocket, GatewayError> {
        self.urls.lock().push(url.to_string());

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(GatewayError::Connect("connection refused".to_string()));
        }

        let (client_tx, client_rx) = fmpsc::unbounded::<Frame>();
        let (server_tx, server_rx) = fmpsc::unbounded::<Result<Frame, GatewayError>>();

        self.sessions
            .send(MockSession {
                url: url.to_string(),
                incoming: client_rx,
                outgoing: server_tx,
            })
            .map_err(|_| GatewayError::Connect("mock server gone".to_string()))?;

        let sink = client_tx.sink_map_err(|e| GatewayError::WebSocket(e.to_string()));
        Ok(GatewaySocket::new(Box::pin(sink), Box::pin(server_rx)))
    }
}

/// Server side of one mock socket
pub(crate) struct MockSession {
    pub(crate) url: String,
    incoming: fmpsc::UnboundedReceiver<Frame>,
    outgoing: fmpsc::UnboundedSender<Result<Frame, GatewayError>>,
}

impl MockSession {
    pub(crate) fn send(&self, message: &GatewayMessage) {
        let json = message.to_json().unwrap();
        let _ = self.outgoing.unbounded_send(Ok(Frame::Text(json)));
    }

    pub(crate) fn send_raw(&self, text: &str) {
        let _ = self.outgoing.unbounded_send(Ok(Frame::Text(text.to_string())));
    }

    pub(crate) fn hello(&self, interval_ms: u64) {
        self.send(&GatewayMessage::hello(interval_ms));
    }

    pub(crate) fn ready(&self, session_id: &str, sequence: u64, guilds: &[u64]) {
        let guilds: Vec<_> = guilds
            .iter()
            .map(|id| serde_json::json!({"id": id.to_string(), "unavailable": true}))
            .collect();
        self.send(&GatewayMessage::dispatch(
            "READY",
            sequence,
            serde_json::json!({
                "v": 10,
                "user": {"id": "1", "username": "bot", "bot": true},
                "guilds": guilds,
                "session_id": session_id,
                "resume_gateway_url": "wss://resume.test",
            }),
        ));
    }

    pub(crate) fn close(&self, code: u16) {
        let _ = self
            .outgoing
            .unbounded_send(Ok(Frame::close(code, "closed by test")));
    }

    pub(crate) fn fail(&self, reason: &str) {
        let _ = self
            .outgoing
            .unbounded_send(Err(GatewayError::WebSocket(reason.to_string())));
    }

    /// Next frame written by the client, `None` once the client dropped the socket
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        self.incoming.next().await
    }

    /// Next JSON message written by the client, skipping close frames
    pub(crate) async fn recv(&mut self) -> Option<GatewayMessage> {
        loop {
            match self.next_frame().await? {
                Frame::Text(text) => return GatewayMessage::from_json(&text).ok(),
                Frame::Close { .. } => {}
            }
        }
    }

    /// Wait for a client message with the given op code
    pub(crate) async fn expect(&mut self, op: OpCode) -> GatewayMessage {
        loop {
            let message = self.recv().await.expect("client closed the socket");
            if message.op == op {
                return message;
            }
        }
    }

    /// Frames the client has written so far without waiting
    pub(crate) fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.incoming.try_next() {
            frames.push(frame);
        }
        frames
    }

    /// Answer like a well-behaved server: hello, READY on identify, RESUMED on
    /// resume, ack on heartbeat. Records when each identify arrived.
    ///
    /// READY lists a single guild, `100 + shard id`.
    pub(crate) async fn serve(mut self, interval_ms: u64, identifies: Arc<Mutex<Vec<Instant>>>) {
        self.hello(interval_ms);
        let mut sequence = 0;
        while let Some(message) = self.recv().await {
            match message.op {
                OpCode::Identify => {
                    identifies.lock().push(Instant::now());
                    sequence += 1;
                    let shard = message.as_identify().and_then(|i| i.shard).unwrap_or([0, 1]);
                    self.ready(
                        &format!("session-{}", shard[0]),
                        sequence,
                        &[100 + u64::from(shard[0])],
                    );
                }
                OpCode::Resume => {
                    sequence += 1;
                    let resumed =
                        GatewayMessage::dispatch("RESUMED", sequence, serde_json::json!({}));
                    self.send(&resumed);
                }
                OpCode::Heartbeat => self.send(&GatewayMessage::heartbeat_ack()),
                _ => {}
            }
        }
    }
}
