use std::time::Duration;
use url::Url;

use crate::domain::errors::{ConfigError, ConnectionError};
use crate::domain::services::backoff::{
    BackoffPolicy, RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS,
};

pub const DEFAULT_HOST: &str = "localhost:8080";
pub const DEFAULT_PATH: &str = "/ws";
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 250;

/// Configuration for the managed connection
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub url: Url,
    pub backoff: BackoffPolicy,
    pub retry_policy: RetryPolicy,
    /// `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    /// Bound on the transport handshake.
    pub connect_timeout: Duration,
}

impl LinkConfig {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: Url) -> Self {
        Self {
            url,
            backoff: BackoffPolicy::default(),
            retry_policy: RetryPolicy::default(),
            heartbeat_interval: None,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Parse a `ws://` or `wss://` URL.
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self::new(url)),
            other => Err(ConnectionError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                other, url
            ))),
        }
    }

    /// `wss://{host}{path}` when `secure`, `ws://{host}{path}` otherwise.
    pub fn for_host(host: &str, path: &str, secure: bool) -> Result<Self, ConnectionError> {
        let scheme = if secure { "wss" } else { "ws" };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self::parse(&format!("{}://{}{}", scheme, host, path))
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Invalid numeric values are logged and replaced by their defaults. Only
    /// a host/path combination that does not form a URL is an error.
    pub fn from_env() -> Result<LinkConfig, ConfigError> {
        let host = std::env::var("RELAYKIT_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let path = std::env::var("RELAYKIT_PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let secure = env_flag("RELAYKIT_SECURE", false);

        let mut config =
            LinkConfig::for_host(&host, &path, secure).map_err(|e| ConfigError::InvalidValue {
                name: "RELAYKIT_HOST".to_string(),
                value: host.clone(),
                reason: e.to_string(),
            })?;

        let base_delay_ms = env_parse("RELAYKIT_BASE_DELAY_MS", DEFAULT_BASE_DELAY_MS, |v| *v > 0);
        let max_delay_ms = env_parse("RELAYKIT_MAX_DELAY_MS", DEFAULT_MAX_DELAY_MS, |v| *v > 0);
        if max_delay_ms < base_delay_ms {
            tracing::warn!(
                "RELAYKIT_MAX_DELAY_MS ({}) is below RELAYKIT_BASE_DELAY_MS ({}), using {} as ceiling",
                max_delay_ms,
                base_delay_ms,
                base_delay_ms
            );
        }
        config.backoff = BackoffPolicy::new(
            Duration::from_millis(base_delay_ms),
            Duration::from_millis(max_delay_ms),
        )
        .with_jitter(env_flag("RELAYKIT_JITTER", false));

        config.retry_policy =
            RetryPolicy::from_max_attempts(env_parse("RELAYKIT_MAX_ATTEMPTS", 0u32, |_| true));

        if let Ok(heartbeat) = std::env::var("RELAYKIT_HEARTBEAT_MS") {
            match heartbeat.parse::<u64>() {
                Ok(0) => config.heartbeat_interval = None,
                Ok(value) => config.heartbeat_interval = Some(Duration::from_millis(value)),
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse RELAYKIT_HEARTBEAT_MS '{}': {}, heartbeat disabled",
                        heartbeat,
                        e
                    );
                }
            }
        }

        config.connect_timeout = Duration::from_millis(env_parse(
            "RELAYKIT_CONNECT_TIMEOUT_MS",
            Self::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            |v| *v > 0,
        ));

        Ok(config)
    }
}

/// Configuration for the outbound event batcher
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Where `HttpBatchSink` posts batches. No endpoint, no analytics.
    pub endpoint: Option<Url>,
    pub max_batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_BATCH_WINDOW_MS),
        }
    }
}

impl BatchConfig {
    pub fn from_env() -> BatchConfig {
        let mut config = BatchConfig::default();

        if let Ok(endpoint) = std::env::var("RELAYKIT_ANALYTICS_URL") {
            match Url::parse(&endpoint) {
                Ok(url) => config.endpoint = Some(url),
                Err(e) => {
                    tracing::warn!(
                        "Invalid RELAYKIT_ANALYTICS_URL '{}': {}, analytics disabled",
                        endpoint,
                        e
                    );
                }
            }
        }

        config.max_batch_size = env_parse("RELAYKIT_BATCH_SIZE", DEFAULT_BATCH_SIZE, |v| *v > 0);
        config.flush_interval = Duration::from_millis(env_parse(
            "RELAYKIT_BATCH_WINDOW_MS",
            DEFAULT_BATCH_WINDOW_MS,
            |v| *v > 0,
        ));

        config
    }
}

fn env_parse<T>(name: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
    T::Err: std::fmt::Display,
{
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            tracing::warn!("Invalid {} value: {}, using default: {}", name, value, default);
            default
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {}",
                name,
                raw,
                e,
                default
            );
            default
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => value.to_lowercase() == "true" || value == "1",
        Err(_) => default,
    }
}
