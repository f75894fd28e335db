//! # chat-core
//!
//! Value objects shared by the gateway connection engine and the REST scheduler.
//! This crate has zero dependencies on networking or async runtimes.

pub mod value_objects;

// Re-export commonly used types at crate root
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
