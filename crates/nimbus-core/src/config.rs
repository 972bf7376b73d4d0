//! Config - 起動時に一度だけ組み立てる設定
//!
//! 環境変数から読み、`validate()` を通したあとは不変のまま各コンポーネントに参照で渡す。
//! 未設定の変数は既定値、値が読めない変数はエラー（黙って既定値に戻さない）。

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::domain::cache_key::DEFAULT_SCOPE;
use crate::impls::http_provider::DEFAULT_BASE_URL;

const DEFAULT_REDIS_SERVER: &str = "127.0.0.1:6379";
const DEFAULT_REQUEST_QUEUE: &str = "weather-requests";
const DEFAULT_RESPONSE_QUEUE: &str = "weather-responses";
const DEFAULT_CONSUMER: &str = "nimbus";
const DEFAULT_WAIT_MS: u64 = 100;
const DEFAULT_MAX_IN_FLIGHT: usize = 32;
const DEFAULT_MAX_MESSAGES: usize = 1;
const DEFAULT_RECEIVE_WAIT_SECS: u64 = 20;
const DEFAULT_RESULT_CHANNEL_CAPACITY: usize = 100;
const DEFAULT_WORKER_DELAY_MS: u64 = 0;
const DEFAULT_CACHE_TTL_SECS: u64 = 1800;
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 20;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0}")]
    Validation(String),
}

/// Dispatch bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bounded wait between publishing and the single cache re-check.
    pub wait: Duration,
}

/// Worker pool and consume-loop settings, shared by both queue consumers.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_in_flight: usize,
    pub max_messages: usize,
    pub receive_wait: Duration,
    pub result_channel_capacity: usize,
    /// Artificial processing delay per request.
    pub worker_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub scope: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: String,
    pub request_queue: String,
    pub response_queue: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub visibility_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Only the backend role talks to the provider, so the key is checked on use.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::Missing("APIKEY"))
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub provider: ProviderConfig,
    pub http: HttpConfig,
    pub shutdown_timeout: Duration,
    /// Stamped on every result; lets callers see which host answered.
    pub server_name: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source. `lookup` returns `None` for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let server_name = vars.string("SERVER_NAME");
        let redis_url = redis_url(&vars.string_or("REDIS_SERVER", DEFAULT_REDIS_SERVER));
        let queue_url = vars
            .string("QUEUE_URL")
            .map(|url| self::redis_url(&url))
            .unwrap_or_else(|| redis_url.clone());

        Ok(Config {
            bridge: BridgeConfig {
                wait: Duration::from_millis(vars.parse_or("WAIT_TIME", DEFAULT_WAIT_MS)?),
            },
            pool: PoolConfig {
                max_in_flight: vars.parse_or("MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?,
                max_messages: vars.parse_or("MAX_MESSAGES", DEFAULT_MAX_MESSAGES)?,
                receive_wait: Duration::from_secs(
                    vars.parse_or("RECEIVE_WAIT_SECS", DEFAULT_RECEIVE_WAIT_SECS)?,
                ),
                result_channel_capacity: vars
                    .parse_or("RESULT_CHANNEL_CAPACITY", DEFAULT_RESULT_CHANNEL_CAPACITY)?,
                worker_delay: Duration::from_millis(
                    vars.parse_or("WORKER_DELAY_MS", DEFAULT_WORKER_DELAY_MS)?,
                ),
            },
            cache: CacheConfig {
                redis_url,
                scope: vars.string_or("CACHE_SCOPE", DEFAULT_SCOPE),
                ttl: Duration::from_secs(vars.parse_or("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?),
            },
            queue: QueueConfig {
                url: queue_url,
                request_queue: vars.string_or("REQUEST_QUEUE", DEFAULT_REQUEST_QUEUE),
                response_queue: vars.string_or("RESPONSE_QUEUE", DEFAULT_RESPONSE_QUEUE),
                consumer_group: vars.string_or("CONSUMER_GROUP", DEFAULT_CONSUMER),
                consumer_name: vars
                    .string("CONSUMER_NAME")
                    .or_else(|| server_name.clone())
                    .unwrap_or_else(|| DEFAULT_CONSUMER.to_string()),
                visibility_timeout: Duration::from_secs(
                    vars.parse_or("VISIBILITY_TIMEOUT_SECS", DEFAULT_VISIBILITY_TIMEOUT_SECS)?,
                ),
            },
            provider: ProviderConfig {
                base_url: vars.string_or("FORECAST_BASE_URL", DEFAULT_BASE_URL),
                api_key: vars.string("APIKEY"),
                timeout: Duration::from_secs(
                    vars.parse_or("PROVIDER_TIMEOUT_SECS", DEFAULT_PROVIDER_TIMEOUT_SECS)?,
                ),
            },
            http: HttpConfig {
                port: vars.parse_or("HTTP_PORT", DEFAULT_HTTP_PORT)?,
            },
            shutdown_timeout: Duration::from_secs(
                vars.parse_or("SHUTDOWN_TIMEOUT_SECS", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?,
            ),
            server_name,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "MAX_IN_FLIGHT must be greater than 0".to_string(),
            ));
        }

        // SQS 互換の上限
        if !(1..=10).contains(&self.pool.max_messages) {
            return Err(ConfigError::Validation(
                "MAX_MESSAGES must be between 1 and 10".to_string(),
            ));
        }

        if self.pool.result_channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "RESULT_CHANNEL_CAPACITY must be greater than 0".to_string(),
            ));
        }

        if self.cache.ttl.is_zero() {
            return Err(ConfigError::Validation(
                "CACHE_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.queue.visibility_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "VISIBILITY_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.queue.request_queue == self.queue.response_queue {
            return Err(ConfigError::Validation(
                "REQUEST_QUEUE and RESPONSE_QUEUE must differ".to_string(),
            ));
        }

        if self.provider.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "PROVIDER_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.http.port == 0 {
            return Err(ConfigError::Validation(
                "HTTP_PORT must be between 1 and 65535".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "SHUTDOWN_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let redis_url = redis_url(DEFAULT_REDIS_SERVER);
        Config {
            bridge: BridgeConfig {
                wait: Duration::from_millis(DEFAULT_WAIT_MS),
            },
            pool: PoolConfig {
                max_in_flight: DEFAULT_MAX_IN_FLIGHT,
                max_messages: DEFAULT_MAX_MESSAGES,
                receive_wait: Duration::from_secs(DEFAULT_RECEIVE_WAIT_SECS),
                result_channel_capacity: DEFAULT_RESULT_CHANNEL_CAPACITY,
                worker_delay: Duration::from_millis(DEFAULT_WORKER_DELAY_MS),
            },
            cache: CacheConfig {
                redis_url: redis_url.clone(),
                scope: DEFAULT_SCOPE.to_string(),
                ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            },
            queue: QueueConfig {
                url: redis_url,
                request_queue: DEFAULT_REQUEST_QUEUE.to_string(),
                response_queue: DEFAULT_RESPONSE_QUEUE.to_string(),
                consumer_group: DEFAULT_CONSUMER.to_string(),
                consumer_name: DEFAULT_CONSUMER.to_string(),
                visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            },
            provider: ProviderConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                api_key: None,
                timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            },
            http: HttpConfig {
                port: DEFAULT_HTTP_PORT,
            },
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            server_name: None,
        }
    }
}

struct Vars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.string(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.string(name) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }
}

/// Hide `user:password@` in a connection URL before it goes to the logs.
pub fn redacted_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

/// `host:port` も受け付ける（古い設定は scheme なしで書かれている）
fn redis_url(value: &str) -> String {
    if value.starts_with("redis://") || value.starts_with("rediss://") {
        value.to_string()
    } else {
        format!("redis://{value}")
    }
}
