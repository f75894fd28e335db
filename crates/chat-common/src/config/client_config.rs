//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use chat_core::Intents;
use std::env;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Bot token used for both the gateway and the REST API
    pub token: String,
    /// Verbose logging; selects the development tracing preset
    pub debug: bool,
    pub gateway: GatewayConfig,
    pub rest: RestConfig,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &"<redacted>")
            .field("debug", &self.debug)
            .field("gateway", &self.gateway)
            .field("rest", &self.rest)
            .finish()
    }
}

/// Gateway connection and sharding configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Default entry address (without query string)
    pub url: String,
    /// Gateway protocol version
    pub version: u8,
    /// Capability flags sent with Identify
    pub intents: Intents,
    /// Member count above which guilds are sent without offline members
    pub large_threshold: u16,
    /// Total shard count; `None` means ask the API for the recommended count
    pub shard_count: Option<u32>,
    /// Explicit subset of shard indices to run; `None` means all of them
    pub shard_ids: Option<Vec<u32>>,
    /// Delay between two consecutive shard spawns
    pub spawn_delay: Duration,
    /// Maximum reconnect attempts before a connection gives up
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffConfig,
    /// Report exhausted reconnects as fatal (`Destroyed`) instead of `Disconnected`
    pub exhausted_is_fatal: bool,
    /// Respawn connections that are destroyed unexpectedly
    pub auto_respawn: bool,
    pub properties: ClientProperties,
}

impl GatewayConfig {
    /// Build the connection address for `base` with version and encoding query
    #[must_use]
    pub fn connect_url(&self, base: &str) -> String {
        format!(
            "{}/?v={}&encoding=json",
            base.trim_end_matches('/'),
            self.version
        )
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            version: DEFAULT_VERSION,
            intents: Intents::default(),
            large_threshold: default_large_threshold(),
            shard_count: None,
            shard_ids: None,
            spawn_delay: Duration::from_millis(default_spawn_delay_ms()),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff: BackoffConfig::default(),
            exhausted_is_fatal: false,
            auto_respawn: false,
            properties: ClientProperties::default(),
        }
    }
}

/// Reconnect backoff parameters
///
/// `delay = min(base * 2^attempt, cap) + uniform(0, delay * jitter)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the delay added as random jitter (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

/// Client metadata sent with Identify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: env::consts::OS.to_string(),
            browser: default_client_name(),
            device: default_client_name(),
        }
    }
}

/// REST scheduler configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// API root without version segment
    pub base_url: String,
    /// API version appended to the base address
    pub version: u8,
    /// Maximum number of queued calls per bucket
    pub max_queue_size: usize,
    /// Maximum time a call may wait in its queue before being dispatched
    pub max_queue_wait: Duration,
    /// Retry budget for throttled (429) calls
    pub max_retries: u32,
    /// Transport timeout for a single HTTP call
    pub request_timeout: Duration,
    /// Client-side ceiling on requests per second across all buckets
    pub global_requests_per_second: Option<NonZeroU32>,
    /// How often expired, idle buckets are reaped
    pub cleanup_interval: Duration,
    pub user_agent: String,
}

impl RestConfig {
    /// Versioned base address, e.g. `https://discord.com/api/v10`
    #[must_use]
    pub fn versioned_base_url(&self) -> String {
        format!("{}/v{}", self.base_url.trim_end_matches('/'), self.version)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            version: DEFAULT_VERSION,
            max_queue_size: default_max_queue_size(),
            max_queue_wait: Duration::from_millis(default_max_queue_wait_ms()),
            max_retries: default_max_retries(),
            request_timeout: Duration::from_millis(default_request_timeout_ms()),
            global_requests_per_second: NonZeroU32::new(default_global_requests_per_second()),
            cleanup_interval: Duration::from_millis(default_cleanup_interval_ms()),
            user_agent: default_user_agent(),
        }
    }
}

const DEFAULT_VERSION: u8 = 10;

// Default value functions
fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_api_url() -> String {
    "https://discord.com/api".to_string()
}

fn default_client_name() -> String {
    "chat-client".to_string()
}

fn default_user_agent() -> String {
    format!("DiscordBot (chat-client, {})", env!("CARGO_PKG_VERSION"))
}

fn default_large_threshold() -> u16 {
    250
}

fn default_spawn_delay_ms() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_max_queue_size() -> usize {
    100
}

fn default_max_queue_wait_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_global_requests_per_second() -> u32 {
    50
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

/// Read and parse an optional environment variable
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

fn parse_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue(name, raw)),
        },
        Err(_) => Ok(None),
    }
}

fn parse_list(name: &'static str) -> Result<Option<Vec<u32>>, ConfigError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<u32>, _>>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            debug: false,
            gateway: GatewayConfig::default(),
            rest: RestConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CHAT_TOKEN` is missing or a value fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token = env::var("CHAT_TOKEN").map_err(|_| ConfigError::MissingVar("CHAT_TOKEN"))?;

        let gateway_defaults = GatewayConfig::default();
        let backoff_defaults = BackoffConfig::default();
        let rest_defaults = RestConfig::default();

        let jitter = parse_var::<f64>("GATEWAY_BACKOFF_JITTER")?.unwrap_or(backoff_defaults.jitter);
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_BACKOFF_JITTER",
                jitter.to_string(),
            ));
        }

        let shard_count = parse_var::<u32>("GATEWAY_SHARD_COUNT")?;
        if shard_count == Some(0) {
            return Err(ConfigError::InvalidValue("GATEWAY_SHARD_COUNT", "0".to_string()));
        }

        let global_ceiling = parse_var::<u32>("REST_GLOBAL_REQUESTS_PER_SECOND")?;
        let global_requests_per_second = match global_ceiling {
            Some(value) => NonZeroU32::new(value),
            None => rest_defaults.global_requests_per_second,
        };

        Ok(Self {
            token,
            debug: parse_bool("CHAT_DEBUG")?.unwrap_or(false),
            gateway: GatewayConfig {
                url: env::var("GATEWAY_URL").unwrap_or(gateway_defaults.url),
                version: parse_var("GATEWAY_VERSION")?.unwrap_or(gateway_defaults.version),
                intents: parse_var::<u64>("GATEWAY_INTENTS")?
                    .map_or(gateway_defaults.intents, Intents::from_bits_retain),
                large_threshold: parse_var("GATEWAY_LARGE_THRESHOLD")?
                    .unwrap_or(gateway_defaults.large_threshold),
                shard_count,
                shard_ids: parse_list("GATEWAY_SHARD_IDS")?,
                spawn_delay: parse_var("GATEWAY_SPAWN_DELAY_MS")?
                    .map_or(gateway_defaults.spawn_delay, Duration::from_millis),
                max_reconnect_attempts: parse_var("GATEWAY_MAX_RECONNECT_ATTEMPTS")?
                    .unwrap_or(gateway_defaults.max_reconnect_attempts),
                backoff: BackoffConfig {
                    base: parse_var("GATEWAY_BACKOFF_BASE_MS")?
                        .map_or(backoff_defaults.base, Duration::from_millis),
                    cap: parse_var("GATEWAY_BACKOFF_CAP_MS")?
                        .map_or(backoff_defaults.cap, Duration::from_millis),
                    jitter,
                },
                exhausted_is_fatal: parse_bool("GATEWAY_EXHAUSTED_IS_FATAL")?
                    .unwrap_or(gateway_defaults.exhausted_is_fatal),
                auto_respawn: parse_bool("GATEWAY_AUTO_RESPAWN")?
                    .unwrap_or(gateway_defaults.auto_respawn),
                properties: gateway_defaults.properties,
            },
            rest: RestConfig {
                base_url: env::var("REST_BASE_URL").unwrap_or(rest_defaults.base_url),
                version: parse_var("REST_VERSION")?.unwrap_or(rest_defaults.version),
                max_queue_size: parse_var("REST_MAX_QUEUE_SIZE")?
                    .unwrap_or(rest_defaults.max_queue_size),
                max_queue_wait: parse_var("REST_MAX_QUEUE_WAIT_MS")?
                    .map_or(rest_defaults.max_queue_wait, Duration::from_millis),
                max_retries: parse_var("REST_MAX_RETRIES")?.unwrap_or(rest_defaults.max_retries),
                request_timeout: parse_var("REST_REQUEST_TIMEOUT_MS")?
                    .map_or(rest_defaults.request_timeout, Duration::from_millis),
                global_requests_per_second,
                cleanup_interval: parse_var("REST_CLEANUP_INTERVAL_MS")?
                    .map_or(rest_defaults.cleanup_interval, Duration::from_millis),
                user_agent: env::var("REST_USER_AGENT").unwrap_or(rest_defaults.user_agent),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
