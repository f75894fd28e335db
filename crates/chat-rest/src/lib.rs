//! # chat-rest
//!
//! Rate-limited REST access: bucket keys, per-bucket queues, a scheduler that
//! honours server rate-limit headers, and a `reqwest` executor behind a trait.

pub mod bucket;
pub mod client;
pub mod error;
pub mod executor;
pub mod headers;
mod queue;
pub mod request;
pub mod route;
pub mod scheduler;

pub use bucket::{BucketSnapshot, RateBucket};
pub use client::{GatewayBot, RestClient, SessionStartLimit};
pub use error::{RestError, RestResult};
pub use executor::{HttpExecutor, RequestExecutor};
pub use headers::RateLimitHeaders;
pub use request::{ApiRequest, ApiResponse, RequestOptions};
pub use route::Route;
pub use scheduler::{RateLimitScheduler, SchedulerStats};
