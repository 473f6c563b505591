//! Process configuration.
//!
//! Everything tunable is read once at startup into an immutable [`Config`]
//! and handed to component constructors. Variables use the `PATCH_SYNC_`
//! prefix; anything unset falls back to the defaults below.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::BackoffPolicy;

const DEFAULT_FEED_URL: &str = "http://localhost:8080/api/v3";
const DEFAULT_PAGE_SIZE: u32 = 500;
const DEFAULT_REPOSITORY_PATTERN: &str = ".*";
const DEFAULT_FEED_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CHECKPOINT_MARGIN_SECS: u64 = 1;
const DEFAULT_SYNC_INTERVAL_MINS: u64 = 60;
const DEFAULT_UPLOAD_LANES: usize = 4;
const DEFAULT_LANE_CAPACITY: usize = 100;
const DEFAULT_EVAL_CHANNEL_CAPACITY: usize = 1000;
const DEFAULT_LISTEN_PORT: u16 = 8000;
const DEFAULT_UPLOAD_QUEUE: &str = "platform.inventory.events";
const DEFAULT_EVAL_QUEUE: &str = "patch.evaluator.upload";

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings for talking to the metadata feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Base URL; endpoint paths are appended to it.
    pub url: String,
    pub page_size: u32,
    /// Repository name pattern sent with every repos request.
    pub repository_pattern: String,
    pub retry: BackoffPolicy,
    /// Status codes that count as soft failures. Empty retries every error.
    pub retry_codes: Vec<u16>,
    pub timeout: Duration,
    /// Log request and response bodies at trace level.
    pub http_debug: bool,
}

/// Settings for the periodic repo-based evaluation pass.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    /// Added to the feed's latest-change timestamp before it is stored.
    pub checkpoint_margin: Duration,
    /// Skip the sweep when the feed reports no export since the last one.
    pub skip_unchanged_export: bool,
}

/// Settings for the upload worker pool.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub lanes: usize,
    pub lane_capacity: usize,
}

/// Broker settings. Only used with the `rabbitmq` feature.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub amqp_uri: Option<String>,
    pub upload_queue: String,
    pub eval_queue: String,
    /// Maximum unacknowledged upload deliveries held by the consumer.
    pub prefetch: u16,
}

/// Immutable process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub feed: FeedConfig,
    pub sync: SyncConfig,
    pub upload: UploadConfig,
    pub broker: BrokerConfig,
    /// Capacity of the in-process evaluation channel used without a broker.
    pub eval_channel_capacity: usize,
    /// Postgres URL. Without it the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub listen_addr: SocketAddr,
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None).unwrap()
    }
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup: &lookup };

        let exponential = vars.parse("PATCH_SYNC_FEED_RETRY_EXPONENTIAL", true)?;
        let max_attempts: u32 =
            vars.parse("PATCH_SYNC_FEED_MAX_ATTEMPTS", DEFAULT_FEED_MAX_ATTEMPTS)?;
        // Zero means retry forever.
        let max_attempts = (max_attempts > 0).then_some(max_attempts);
        let interval_ms: u64 = vars.parse("PATCH_SYNC_FEED_RETRY_INTERVAL_MS", 1000)?;
        let max_interval_secs: u64 = vars.parse("PATCH_SYNC_FEED_RETRY_MAX_INTERVAL_SECS", 60)?;
        let retry = BackoffPolicy::from_flag(exponential, max_attempts)
            .with_interval(Duration::from_millis(interval_ms))
            .with_max_interval(Duration::from_secs(max_interval_secs));

        let feed = FeedConfig {
            url: vars.string("PATCH_SYNC_FEED_URL", DEFAULT_FEED_URL),
            page_size: vars.parse("PATCH_SYNC_FEED_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            repository_pattern: vars
                .string("PATCH_SYNC_REPOSITORY_PATTERN", DEFAULT_REPOSITORY_PATTERN),
            retry,
            retry_codes: vars.status_codes("PATCH_SYNC_FEED_RETRY_CODES")?,
            timeout: Duration::from_secs(
                vars.nonzero("PATCH_SYNC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            ),
            http_debug: vars.parse("PATCH_SYNC_HTTP_DEBUG", false)?,
        };

        let interval_mins: u64 =
            vars.nonzero("PATCH_SYNC_INTERVAL_MINS", DEFAULT_SYNC_INTERVAL_MINS)?;
        let interval = interval_mins
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Invalid {
                var: "PATCH_SYNC_INTERVAL_MINS",
                value: interval_mins.to_string(),
                reason: "interval is too large".to_string(),
            })?;
        let sync = SyncConfig {
            interval,
            checkpoint_margin: Duration::from_secs(vars.parse(
                "PATCH_SYNC_CHECKPOINT_MARGIN_SECS",
                DEFAULT_CHECKPOINT_MARGIN_SECS,
            )?),
            skip_unchanged_export: vars.parse("PATCH_SYNC_SKIP_UNCHANGED_EXPORT", true)?,
        };

        let upload = UploadConfig {
            lanes: vars.nonzero("PATCH_SYNC_UPLOAD_LANES", DEFAULT_UPLOAD_LANES)?,
            lane_capacity: vars.nonzero("PATCH_SYNC_UPLOAD_LANE_CAPACITY", DEFAULT_LANE_CAPACITY)?,
        };
        // Enough unacknowledged deliveries to fill every lane once.
        let default_prefetch =
            u16::try_from(upload.lanes.saturating_mul(upload.lane_capacity)).unwrap_or(u16::MAX);

        let broker = BrokerConfig {
            amqp_uri: vars.optional("PATCH_SYNC_AMQP_URI"),
            upload_queue: vars.string("PATCH_SYNC_UPLOAD_QUEUE", DEFAULT_UPLOAD_QUEUE),
            eval_queue: vars.string("PATCH_SYNC_EVAL_QUEUE", DEFAULT_EVAL_QUEUE),
            prefetch: vars.nonzero("PATCH_SYNC_AMQP_PREFETCH", default_prefetch)?,
        };

        let listen_addr = vars.parse(
            "PATCH_SYNC_LISTEN_ADDR",
            SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
        )?;

        Ok(Config {
            feed,
            sync,
            upload,
            broker,
            eval_channel_capacity: vars
                .parse("PATCH_SYNC_EVAL_CHANNEL_CAPACITY", DEFAULT_EVAL_CHANNEL_CAPACITY)?,
            database_url: vars.optional("PATCH_SYNC_DATABASE_URL"),
            listen_addr,
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    /// Like [`Vars::parse`], but zero is rejected.
    fn nonzero<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(var, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn status_codes(&self, var: &'static str) -> Result<Vec<u16>, ConfigError> {
        let Some(value) = self.optional(var) else {
            return Ok(Vec::new());
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|code| {
                code.parse::<u16>().map_err(|e| ConfigError::Invalid {
                    var,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}
