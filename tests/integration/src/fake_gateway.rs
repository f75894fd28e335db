//! WebSocket gateway stand-in
//!
//! Every accepted socket gets Hello, READY on Identify, RESUMED on Resume and
//! an ack for each heartbeat. Tests drive closes and dispatches through a
//! broadcast channel and read back what clients sent.

use crate::fixtures::ready_payload;
use anyhow::{bail, Context, Result};
use chat_gateway::{GatewayMessage, OpCode};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// How long `expect` waits for a client message
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// A message a client wrote
#[derive(Debug, Clone)]
pub struct Received {
    /// Accept order of the socket, starting at 0
    pub connection: usize,
    pub message: GatewayMessage,
    pub at: Instant,
}

#[derive(Debug, Clone)]
enum Control {
    Close(u16),
    Dispatch { name: String, data: Value },
}

/// Gateway server bound to an ephemeral local port
pub struct FakeGateway {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Received>,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
    _handle: JoinHandle<()>,
}

impl FakeGateway {
    /// Start a gateway that asks clients to heartbeat every `heartbeat_interval_ms`
    pub async fn start(heartbeat_interval_ms: u64) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (received_tx, received) = mpsc::unbounded_channel();
        let (control, _) = broadcast::channel(16);
        let connections = Arc::new(AtomicUsize::new(0));

        let handle = {
            let control = control.clone();
            let connections = Arc::clone(&connections);
            let url = format!("ws://{addr}");
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let id = connections.fetch_add(1, Ordering::SeqCst);
                    let session = Session {
                        id,
                        heartbeat_interval_ms,
                        url: url.clone(),
                        received: received_tx.clone(),
                        control: control.subscribe(),
                    };
                    tokio::spawn(async move {
                        if let Err(e) = session.run(stream).await {
                            eprintln!("fake gateway connection {id} ended: {e:#}");
                        }
                    });
                }
            })
        };

        Ok(Self {
            addr,
            received,
            control,
            connections,
            _handle: handle,
        })
    }

    /// Base URL clients connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Sockets accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next message any client sent
    pub async fn next_message(&mut self) -> Result<Received> {
        match timeout(RECEIVE_TIMEOUT, self.received.recv()).await {
            Ok(Some(received)) => Ok(received),
            Ok(None) => bail!("fake gateway stopped"),
            Err(_) => bail!("no client message within {RECEIVE_TIMEOUT:?}"),
        }
    }

    /// Skip ahead to the next message with op code `op`
    pub async fn expect(&mut self, op: OpCode) -> Result<Received> {
        loop {
            let received = self.next_message().await?;
            if received.message.op == op {
                return Ok(received);
            }
        }
    }

    /// Close every open socket with `code`
    pub fn close_all(&self, code: u16) {
        let _ = self.control.send(Control::Close(code));
    }

    /// Send a dispatch to every open socket
    pub fn dispatch(&self, name: &str, data: Value) {
        let _ = self.control.send(Control::Dispatch {
            name: name.to_string(),
            data,
        });
    }
}

/// Server side of one accepted socket
struct Session {
    id: usize,
    heartbeat_interval_ms: u64,
    url: String,
    received: mpsc::UnboundedSender<Received>,
    control: broadcast::Receiver<Control>,
}

impl Session {
    async fn run(mut self, stream: TcpStream) -> Result<()> {
        let socket = tokio_tungstenite::accept_async(stream)
            .await
            .context("websocket upgrade failed")?;
        let (mut sink, mut stream) = socket.split();

        send(&mut sink, &GatewayMessage::hello(self.heartbeat_interval_ms)).await?;
        let mut sequence = 0;

        loop {
            tokio::select! {
                frame = stream.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    let text = match frame? {
                        Message::Text(text) => text,
                        Message::Close(_) => return Ok(()),
                        _ => continue,
                    };
                    let message = GatewayMessage::from_json(&text)?;
                    let _ = self.received.send(Received {
                        connection: self.id,
                        message: message.clone(),
                        at: Instant::now(),
                    });
                    self.answer(&mut sink, &message, &mut sequence).await?;
                }
                control = self.control.recv() => match control {
                    Ok(Control::Close(code)) => {
                        sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: "closed by test".into(),
                        })))
                        .await?;
                        return Ok(());
                    }
                    Ok(Control::Dispatch { name, data }) => {
                        sequence += 1;
                        send(&mut sink, &GatewayMessage::dispatch(name, sequence, data)).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    async fn answer(
        &self,
        sink: &mut Sink,
        message: &GatewayMessage,
        sequence: &mut u64,
    ) -> Result<()> {
        match message.op {
            OpCode::Identify => {
                let shard = message
                    .as_identify()
                    .and_then(|identify| identify.shard)
                    .unwrap_or([0, 1]);
                *sequence += 1;
                let payload = ready_payload(shard, &self.url);
                let ready = GatewayMessage::dispatch("READY", *sequence, payload);
                send(sink, &ready).await
            }
            OpCode::Resume => {
                let resumed_from = message.as_resume().map_or(0, |resume| resume.seq);
                *sequence = (*sequence).max(resumed_from) + 1;
                let resumed = GatewayMessage::dispatch("RESUMED", *sequence, serde_json::json!({}));
                send(sink, &resumed).await
            }
            OpCode::Heartbeat => send(sink, &GatewayMessage::heartbeat_ack()).await,
            _ => Ok(()),
        }
    }
}

async fn send(sink: &mut Sink, message: &GatewayMessage) -> Result<()> {
    sink.send(Message::Text(message.to_json()?)).await?;
    Ok(())
}
