//! # chat-common
//!
//! Shared utilities: client configuration and telemetry.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    BackoffConfig, ClientConfig, ClientProperties, ConfigError, GatewayConfig, RestConfig,
};
pub use telemetry::{init_tracing, try_init_tracing, TracingConfig, TracingError};
