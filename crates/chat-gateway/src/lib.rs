//! # chat-gateway
//!
//! Sharded gateway client: protocol types, the per-shard connection state
//! machine, heartbeats and the shard manager.

pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

pub use connection::{
    route, Connection, ConnectionContext, ConnectionManager, ConnectionState, ConnectionStatus,
    ManagerStats,
};
pub use error::{GatewayError, GatewayResult};
pub use events::{DispatchEvent, EventHandler, GatewayEventType, ShardEvent};
pub use protocol::{CloseAction, CloseCode, GatewayMessage, OpCode};
pub use transport::{GatewayConnector, TungsteniteConnector};
