//! Client Configuration Settings
//!
//! Configuration for the stream client, loaded from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `BYBIT_STREAM_URL` | `wss://stream.bybit.com/v5/public/spot` |
//! | `BYBIT_REST_URL` | `https://api.bybit.com` |
//! | `STREAM_CATEGORY` | `spot` |
//! | `STREAM_TICKERS` | `BTCUSDT` (comma separated) |
//! | `STREAM_RECONNECT_ATTEMPTS` | `-1` (negative = unlimited) |
//! | `STREAM_RECONNECT_INTERVAL_MS` | `5000` |
//! | `STREAM_CONNECTION_TIMEOUT_MS` | `30000` (`0` = wait forever) |
//! | `STREAM_HEARTBEAT_ENABLED` | `true` |
//! | `STREAM_HEARTBEAT_INTERVAL_MS` | `20000` |
//! | `CATALOG_TTL_SECS` | `21600` |
//! | `CATALOG_WARMUP` | `true` |
//! | `METRICS_PORT` | `9090` (`0` = disabled) |

use std::time::Duration;

use chrono::TimeDelta;

use crate::domain::connection::{ConnectionParameters, ReconnectionAttempts};
use crate::domain::market::{Category, Security};
use crate::infrastructure::rest::catalog::DEFAULT_BASE_URL;

/// Default public spot stream.
pub const DEFAULT_STREAM_URL: &str = "wss://stream.bybit.com/v5/public/spot";

/// Stream connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Stream URL.
    pub url: String,
    /// Retry budget for failed connects.
    pub reconnection_attempts: ReconnectionAttempts,
    /// Pause between connect attempts.
    pub reconnection_interval: Duration,
    /// Per-operation timeout (`None` = wait forever).
    pub connection_timeout: Option<Duration>,
    /// Whether pings are sent while connected.
    pub heartbeat_enabled: bool,
    /// Interval between pings.
    pub heartbeat_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            reconnection_attempts: ReconnectionAttempts::Infinite,
            reconnection_interval: Duration::from_secs(5),
            connection_timeout: Some(Duration::from_secs(30)),
            heartbeat_enabled: true,
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

impl StreamSettings {
    /// Connection parameters for the engine.
    #[must_use]
    pub fn connection_parameters(&self) -> ConnectionParameters {
        let parameters = ConnectionParameters::new(self.url.clone())
            .with_reconnection(self.reconnection_attempts, self.reconnection_interval)
            .with_connection_timeout(self.connection_timeout);

        if self.heartbeat_enabled {
            parameters.with_heartbeat(self.heartbeat_interval)
        } else {
            parameters.without_heartbeat()
        }
    }
}

/// Security catalog settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    /// REST base URL.
    pub rest_url: String,
    /// How long a listing stays fresh.
    pub ttl: TimeDelta,
    /// List the stream category once at startup.
    pub warmup: bool,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            rest_url: DEFAULT_BASE_URL.to_string(),
            ttl: TimeDelta::hours(6),
            warmup: true,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Catalog settings.
    pub catalog: CatalogSettings,
    /// Category of the stream and of the configured tickers.
    pub category: Category,
    /// Tickers to subscribe to at startup.
    pub tickers: Vec<String>,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stream: StreamSettings::default(),
            catalog: CatalogSettings::default(),
            category: Category::Spot,
            tickers: vec!["BTCUSDT".to_string()],
            metrics_port: 9090,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but empty or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// As for [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let url = env.non_empty("BYBIT_STREAM_URL")?.unwrap_or(defaults.stream.url);

        let reconnection_attempts = env
            .parsed::<i64>("STREAM_RECONNECT_ATTEMPTS")?
            .map_or(defaults.stream.reconnection_attempts, ReconnectionAttempts::from_signed);

        let connection_timeout = match env.parsed::<u64>("STREAM_CONNECTION_TIMEOUT_MS")? {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.stream.connection_timeout,
        };

        let stream = StreamSettings {
            url,
            reconnection_attempts,
            reconnection_interval: env
                .millis("STREAM_RECONNECT_INTERVAL_MS")?
                .unwrap_or(defaults.stream.reconnection_interval),
            connection_timeout,
            heartbeat_enabled: env
                .flag("STREAM_HEARTBEAT_ENABLED")?
                .unwrap_or(defaults.stream.heartbeat_enabled),
            heartbeat_interval: env
                .millis("STREAM_HEARTBEAT_INTERVAL_MS")?
                .unwrap_or(defaults.stream.heartbeat_interval),
        };

        let catalog = CatalogSettings {
            rest_url: env
                .non_empty("BYBIT_REST_URL")?
                .unwrap_or(defaults.catalog.rest_url),
            ttl: env
                .parsed::<i64>("CATALOG_TTL_SECS")?
                .map_or(defaults.catalog.ttl, TimeDelta::seconds),
            warmup: env.flag("CATALOG_WARMUP")?.unwrap_or(defaults.catalog.warmup),
        };

        let category = match env.non_empty("STREAM_CATEGORY")? {
            Some(raw) => Category::from_str_case_insensitive(&raw).ok_or(ConfigError::InvalidValue {
                key: "STREAM_CATEGORY".to_string(),
                value: raw,
            })?,
            None => defaults.category,
        };

        let tickers = env.non_empty("STREAM_TICKERS")?.map_or(defaults.tickers, |raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_uppercase)
                .collect()
        });

        Ok(Self {
            stream,
            catalog,
            category,
            tickers,
            metrics_port: env
                .parsed::<u16>("METRICS_PORT")?
                .unwrap_or(defaults.metrics_port),
        })
    }

    /// Configured tickers as securities of the configured category.
    #[must_use]
    pub fn securities(&self) -> Vec<Security> {
        self.tickers
            .iter()
            .map(|ticker| Security::new(ticker.clone(), self.category))
            .collect()
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn non_empty(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.0)(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(value) => Ok(Some(value.trim().to_string())),
            None => Ok(None),
        }
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.non_empty(key)?
            .map(|value| {
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_millis))
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.non_empty(key)?
            .map(|value| match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                }),
            })
            .transpose()
    }
}
