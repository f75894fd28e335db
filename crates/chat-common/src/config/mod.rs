//! Configuration structs

mod client_config;

pub use client_config::{
    BackoffConfig, ClientConfig, ClientProperties, ConfigError, GatewayConfig, RestConfig,
};
