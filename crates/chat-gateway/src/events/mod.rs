//! Gateway events
//!
//! Dispatch event names, the payloads the client reads, and the typed
//! notifications connections emit.

mod event_types;
mod handler;
mod payloads;
mod shard_event;

pub use event_types::GatewayEventType;
pub use handler::{dispatch_event, run_event_loop, EventHandler};
pub use payloads::{CurrentUser, GuildIdPayload, ReadyEvent, UnavailableGuild};
pub use shard_event::{DispatchEvent, ShardEvent};
