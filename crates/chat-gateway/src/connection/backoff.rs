//! Reconnect backoff
//!
//! `delay = min(base * 2^attempt, cap) + uniform(0, delay * jitter)`

use chat_common::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Delay before reconnect attempt number `attempt` (0-based)
pub fn reconnect_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    delay_with_sample(config, attempt, rand::thread_rng().gen::<f64>())
}

/// Deterministic form of [`reconnect_delay`]; `sample` is the jitter draw in `[0, 1]`
pub fn delay_with_sample(config: &BackoffConfig, attempt: u32, sample: f64) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let delay = config.base.saturating_mul(factor).min(config.cap);

    let jitter = config.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0);
    delay + delay.mul_f64(jitter)
}
