//! Rate-limit response headers

use crate::error::RestError;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET: &str = "x-ratelimit-reset";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const SCOPE: &str = "x-ratelimit-scope";
pub const RETRY_AFTER: &str = "retry-after";

/// Longest wait a server-reported duration may impose
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Rate-limit state reported by one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Absolute reset time, epoch seconds
    pub reset: Option<f64>,
    pub reset_after: Option<Duration>,
    /// Server bucket hash
    pub bucket: Option<String>,
    pub global: bool,
    pub scope: Option<String>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parse the rate-limit headers of a response
    ///
    /// Absent headers stay `None`; present but unparsable ones are an error.
    pub fn parse(headers: &HeaderMap) -> Result<Self, RestError> {
        Ok(Self {
            limit: number(headers, LIMIT)?,
            remaining: number(headers, REMAINING)?,
            reset: number(headers, RESET)?,
            reset_after: seconds(headers, RESET_AFTER)?,
            bucket: text(headers, BUCKET)?.map(str::to_string),
            global: text(headers, GLOBAL)?.is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: text(headers, SCOPE)?.map(str::to_string),
            retry_after: seconds(headers, RETRY_AFTER)?,
        })
    }

    /// Whether the response carried any bucket information
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset.is_none()
            && self.reset_after.is_none()
            && self.bucket.is_none()
    }
}

/// Body of a 429 response
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitBody {
    #[serde(default)]
    pub message: String,
    /// Seconds, possibly fractional
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}

impl RateLimitBody {
    /// Parse a 429 body, `None` if it is not the expected shape
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    pub fn retry_after(&self) -> Duration {
        duration_from_secs(self.retry_after)
    }
}

/// Seconds as a duration, capped at `MAX_RATE_LIMIT_WAIT`
///
/// Negative and NaN values become zero, infinity becomes the cap.
pub(crate) fn duration_from_secs(secs: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs.max(0.0))
        .map_or(MAX_RATE_LIMIT_WAIT, |duration| duration.min(MAX_RATE_LIMIT_WAIT))
}

fn text<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, RestError> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| RestError::InvalidHeader {
                name: name.to_string(),
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            })
        })
        .transpose()
}

fn number<T: FromStr>(headers: &HeaderMap, name: &str) -> Result<Option<T>, RestError> {
    text(headers, name)?
        .map(|raw| {
            raw.trim().parse().map_err(|_| RestError::InvalidHeader {
                name: name.to_string(),
                value: raw.to_string(),
            })
        })
        .transpose()
}

fn seconds(headers: &HeaderMap, name: &str) -> Result<Option<Duration>, RestError> {
    Ok(number::<f64>(headers, name)?.map(duration_from_secs))
}
