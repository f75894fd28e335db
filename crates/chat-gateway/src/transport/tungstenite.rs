//! `tokio-tungstenite` backed connector

use super::{Frame, GatewayConnector, GatewaySocket};
use crate::error::GatewayError;
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Connects over WebSocket (plain or TLS)
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    /// Default time allowed for the TCP/TLS/upgrade handshake
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text),
            Self::Close { code, reason } => Message::Close(code.map(|code| CloseFrame {
                code: WsCloseCode::from(code),
                reason: reason.into(),
            })),
        }
    }

    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Some(Self::Text(text)),
                Err(e) => {
                    warn!(error = %e, "Dropping non UTF-8 binary frame");
                    None
                }
            },
            Message::Close(frame) => Some(match frame {
                Some(frame) => Self::Close {
                    code: Some(u16::from(frame.code)),
                    reason: frame.reason.into_owned(),
                },
                None => Self::Close {
                    code: None,
                    reason: String::new(),
                },
            }),
            // Pings are answered by tungstenite itself
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        }
    }
}

#[async_trait]
impl GatewayConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<GatewaySocket, GatewayError> {
        let (ws_stream, response) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                GatewayError::Connect(format!("timed out after {:?}", self.connect_timeout))
            })?
            .map_err(|e| GatewayError::Connect(e.to_string()))?;

        debug!(url = %url, status = %response.status(), "WebSocket upgraded");

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(|e| GatewayError::WebSocket(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, GatewayError>(frame.into_message())));

        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(message) => Frame::from_message(message).map(Ok),
                Err(e) => Some(Err(GatewayError::WebSocket(e.to_string()))),
            })
        });

        Ok(GatewaySocket::new(Box::pin(sink), Box::pin(stream)))
    }
}
