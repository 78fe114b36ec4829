use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::codec::Compression;

/// The smallest TTL that is honored for negative caching.
///
/// Both tiers store expirations with millisecond precision, anything below is treated as
/// "disabled".
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// A cache was constructed with an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cache name must not be empty")]
    EmptyName,
    #[error("at least one of the local and the remote tier must be configured")]
    NoTier,
    #[error("local tier capacity must be positive")]
    LocalCapacity,
    #[error("local tier fresh ttl must be positive")]
    LocalFreshTtl,
    #[error("local tier negative ttl must be at least 1ms")]
    LocalNegativeTtlPrecision,
    #[error("local tier negative ttl must be shorter than its fresh ttl")]
    LocalNegativeTtlTooLong,
    #[error("remote tier prefix must not be empty")]
    RemotePrefix,
    #[error("remote tier hard ttl must be at least 1ms")]
    RemoteHardTtl,
    #[error("remote tier miss ttl must be at least 1ms")]
    RemoteMissTtlPrecision,
}

/// Configuration of the bounded in-process tier.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
pub struct LocalTierConfig {
    /// Maximum number of items kept in memory.
    pub capacity: u64,

    /// Time after which a stored value is considered stale.
    #[serde(with = "humantime_serde")]
    pub fresh_ttl: Duration,

    /// Time a loader miss is remembered. `0s` disables negative caching.
    #[serde(default, with = "humantime_serde")]
    pub negative_ttl: Duration,
}

impl LocalTierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::LocalCapacity);
        }
        if !self.negative_ttl.is_zero() && self.negative_ttl < MIN_TTL {
            return Err(ConfigError::LocalNegativeTtlPrecision);
        }
        if self.fresh_ttl.is_zero() {
            return Err(ConfigError::LocalFreshTtl);
        }
        if !self.negative_ttl.is_zero() && self.fresh_ttl <= self.negative_ttl {
            return Err(ConfigError::LocalNegativeTtlTooLong);
        }
        Ok(())
    }
}

/// Configuration of the shared remote tier.
///
/// The store itself lives under `prefix_<key>`.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct RemoteTierConfig {
    /// Namespace prepended to every key, separated by `_`.
    pub prefix: String,

    /// Time after which the remote store drops a value.
    #[serde(with = "humantime_serde")]
    pub hard_ttl: Duration,

    /// Age after which a remote value is stale and gets reloaded.
    ///
    /// This is expected to be shorter than `hard_ttl`, although that is not enforced.
    #[serde(with = "humantime_serde")]
    pub soft_ttl: Duration,

    /// Time a loader miss is remembered. `0s` disables negative caching.
    #[serde(default, with = "humantime_serde")]
    pub miss_ttl: Duration,
}

impl RemoteTierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::RemotePrefix);
        }
        if self.hard_ttl < MIN_TTL {
            return Err(ConfigError::RemoteHardTtl);
        }
        if !self.miss_ttl.is_zero() && self.miss_ttl < MIN_TTL {
            return Err(ConfigError::RemoteMissTtlPrecision);
        }
        Ok(())
    }
}

/// Validates everything a cache needs before it is constructed.
pub fn validate(
    name: &str,
    local: Option<&LocalTierConfig>,
    remote: Option<&RemoteTierConfig>,
) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyName);
    }
    if local.is_none() && remote.is_none() {
        return Err(ConfigError::NoTier);
    }
    if let Some(local) = local {
        local.validate()?;
    }
    if let Some(remote) = remote {
        remote.validate()?;
    }
    Ok(())
}

/// Connection settings for the Redis remote store.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct RedisConfig {
    /// A `redis://` connection url.
    pub url: String,

    /// Timeout for establishing the connection.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for a single pipelined round trip.
    #[serde(default = "default_io_timeout", with = "humantime_serde")]
    pub io_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(1)
}

/// The remote tier as it appears in the config file.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct RemoteConfig {
    #[serde(flatten)]
    pub tier: RemoteTierConfig,

    pub redis: RedisConfig,
}

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// With colors
    Pretty,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Pretty,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: std::env::var("STATSD_SERVER").ok(),
            prefix: "levelcache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The in-process tier, if any.
    pub local: Option<LocalTierConfig>,

    /// The shared Redis tier, if any.
    pub remote: Option<RemoteConfig>,

    /// Compression applied to stored payloads.
    pub compression: Compression,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Checks the tier settings without constructing a cache.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        validate(
            name,
            self.local.as_ref(),
            self.remote.as_ref().map(|remote| &remote.tier),
        )
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
