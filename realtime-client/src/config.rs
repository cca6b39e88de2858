use std::time::Duration;

use backoff::BackoffPolicy;

use crate::error::{ClientError, Result};

/// Client configuration, read from the environment with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket notification endpoint, e.g. `wss://api.wayfarer.app/ws/notifications`
    pub ws_url: String,
    /// Base URL of the REST API used as the fallback path
    pub api_base_url: String,
    /// Maximum number of notifications kept in the recent cache
    pub cache_capacity: usize,
    /// First reconnect delay in milliseconds
    pub base_delay_ms: u64,
    /// Reconnect delay ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Reconnect attempts before giving up
    pub max_attempts: u32,
    /// How long an optimistic intent waits for an ack before committing
    pub ack_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "wss://api.wayfarer.app/ws/notifications".to_string(),
            api_base_url: "https://api.wayfarer.app".to_string(),
            cache_capacity: 20,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            ack_timeout_ms: 10_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        Ok(Config {
            ws_url: std::env::var("NOTIFICATIONS_WS_URL").unwrap_or(defaults.ws_url),
            api_base_url: std::env::var("API_BASE_URL").unwrap_or(defaults.api_base_url),
            cache_capacity: env_parse("NOTIFICATIONS_CACHE_CAPACITY", defaults.cache_capacity)?,
            base_delay_ms: env_parse("RECONNECT_BASE_DELAY_MS", defaults.base_delay_ms)?,
            max_delay_ms: env_parse("RECONNECT_MAX_DELAY_MS", defaults.max_delay_ms)?,
            max_attempts: env_parse("RECONNECT_MAX_ATTEMPTS", defaults.max_attempts)?,
            ack_timeout_ms: env_parse("INTENT_ACK_TIMEOUT_MS", defaults.ack_timeout_ms)?,
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ClientError::Config(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
