//! Socket transport seam
//!
//! The connection state machine only ever talks to a [`GatewaySocket`]; the
//! [`GatewayConnector`] that produces it is injected so the engine can run over
//! a real WebSocket or over in-memory channels.

#[cfg(test)]
pub(crate) mod mock;
mod tungstenite;

pub use self::tungstenite::TungsteniteConnector;

use crate::error::GatewayError;
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

/// Transport-level frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON text payload
    Text(String),
    /// Close frame; `code` is `None` when the peer sent no status
    Close { code: Option<u16>, reason: String },
}

impl Frame {
    /// Close frame with a status code
    #[must_use]
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close {
            code: Some(code),
            reason: reason.into(),
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = GatewayError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, GatewayError>> + Send>>;

/// An open socket split into its write and read halves
pub struct GatewaySocket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl GatewaySocket {
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for GatewaySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySocket").finish_non_exhaustive()
    }
}

/// Opens gateway sockets
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Open a socket to `url` (query string included)
    async fn connect(&self, url: &str) -> Result<GatewaySocket, GatewayError>;
}
