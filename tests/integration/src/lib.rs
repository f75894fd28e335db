//! Integration test utilities for the chat client
//!
//! Local stand-ins for the remote side: a WebSocket gateway that speaks the
//! handshake over real sockets and an HTTP API that answers with rate-limit
//! headers.

pub mod fake_api;
pub mod fake_gateway;
pub mod fixtures;
pub mod helpers;

pub use fake_api::{FakeApi, Hit};
pub use fake_gateway::{FakeGateway, Received};
pub use fixtures::*;
pub use helpers::*;
