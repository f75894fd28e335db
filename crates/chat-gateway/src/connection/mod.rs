//! Connection management
//!
//! One actor per shard, the heartbeat timer it drives, and the manager that
//! spawns, routes to and aggregates the shards.

mod backoff;
mod connection;
mod heartbeat;
mod manager;
mod state;

pub use backoff::{delay_with_sample, reconnect_delay};
pub use connection::{Connection, ConnectionContext, HELLO_TIMEOUT};
pub use heartbeat::{HeartbeatSignal, HeartbeatTimer};
pub use manager::{route, ConnectionManager, ManagerStats};
pub use state::{ConnectionState, ConnectionStatus};
