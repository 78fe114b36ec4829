//! The shared remote tier.
//!
//! The tier talks to a [`RemoteStore`], a key-value store that can execute a batch of
//! GET, SET or DEL commands in a single round trip. [`RedisStore`] is the production store,
//! [`MemoryStore`] keeps everything in process and exists mostly for testing.
//!
//! Keys are namespaced as `<prefix>_<key>` so multiple caches can share one store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::codec::{self, Compression, Record};
use crate::config::{MIN_TTL, RemoteTierConfig};

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Errors talking to a remote store.
#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error("timeout connecting to remote store")]
    ConnectTimeout,
    #[error("timeout waiting for remote store")]
    Timeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RemoteError {
    fn metrics_tag(&self) -> &'static str {
        match self {
            RemoteError::ConnectTimeout => "connect-timeout",
            RemoteError::Timeout => "timeout",
            RemoteError::Other(_) => "other",
        }
    }
}

/// A single SET issued to a [`RemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub key: String,
    pub value: Bytes,
    /// Time after which the store drops the value.
    pub ttl: Duration,
}

/// A key-value store executing batches of commands in one round trip.
///
/// Implementations must be safe to use from many concurrent callers.
#[async_trait]
pub trait RemoteStore: fmt::Debug + Send + Sync {
    /// Fetches all `keys`.
    ///
    /// The returned values line up with `keys`, `None` marks keys the store does not have.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, RemoteError>;

    /// Stores all `entries`, each with its own TTL.
    async fn set_many(&self, entries: Vec<StoreEntry>) -> Result<(), RemoteError>;

    /// Deletes all `keys`.
    async fn delete_many(&self, keys: &[String]) -> Result<(), RemoteError>;

    /// A short name used in logs and metrics.
    fn name(&self) -> &'static str;
}

/// The remote tier of a cache: namespacing, envelopes and TTLs on top of a [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct RemoteTier {
    name: String,
    store: Arc<dyn RemoteStore>,
    config: RemoteTierConfig,
    compression: Compression,
}

impl RemoteTier {
    pub fn new(
        name: &str,
        store: Arc<dyn RemoteStore>,
        config: RemoteTierConfig,
        compression: Compression,
    ) -> Self {
        RemoteTier {
            name: name.to_owned(),
            store,
            config,
            compression,
        }
    }

    /// Age up to which a remote record counts as fresh.
    pub fn soft_ttl(&self) -> Duration {
        self.config.soft_ttl
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}_{key}", self.config.prefix)
    }

    /// Fetches all `keys` in one round trip.
    ///
    /// Keys that are absent, fail to decode, or could not be fetched at all are left out of
    /// the returned map.
    pub async fn get_many(&self, keys: &[String]) -> HashMap<String, Record> {
        let store_keys: Vec<_> = keys.iter().map(|key| self.namespaced(key)).collect();
        let values = match self.store.get_many(&store_keys).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                tracing::error!(
                    expected = keys.len(),
                    got = values.len(),
                    "Remote store {} returned a mismatched batch",
                    self.store.name(),
                );
                return HashMap::new();
            }
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    "Error fetching from {} remote tier",
                    self.store.name(),
                );
                metric!(
                    counter("levelcache.remote.fetch") += keys.len() as i64,
                    "cache" => &self.name,
                    "status" => "error",
                    "errdetails" => e.metrics_tag(),
                );
                return HashMap::new();
            }
        };

        let mut records = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            let Some(data) = value else {
                continue;
            };
            match codec::decode(&data) {
                Ok(record) => {
                    records.insert(key.clone(), record);
                }
                Err(e) => {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        key = key.as_str(),
                        "Malformed item in remote tier"
                    );
                }
            }
        }

        metric!(
            counter("levelcache.remote.fetch") += records.len() as i64,
            "cache" => &self.name,
            "status" => "ok",
            "hit" => "true",
        );
        metric!(
            counter("levelcache.remote.fetch") += (keys.len() - records.len()) as i64,
            "cache" => &self.name,
            "status" => "ok",
            "hit" => "false",
        );
        records
    }

    /// Writes fresh values and miss markers in one round trip.
    ///
    /// Values live for the hard TTL, miss markers for the miss TTL. Miss markers are skipped
    /// when negative caching is disabled.
    pub async fn set_many(
        &self,
        fresh: &HashMap<String, Bytes>,
        misses: &[String],
        written_at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        let miss_ttl = self.config.miss_ttl;
        let misses = if miss_ttl < MIN_TTL { &[][..] } else { misses };

        let mut entries = Vec::with_capacity(fresh.len() + misses.len());
        for (key, raw) in fresh {
            let record = Record::present(raw.clone(), written_at);
            if let Some(entry) = self.entry(key, &record, self.config.hard_ttl) {
                entries.push(entry);
            }
        }
        for key in misses {
            if let Some(entry) = self.entry(key, &Record::miss(written_at), miss_ttl) {
                entries.push(entry);
            }
        }
        if entries.is_empty() {
            return Ok(());
        }

        let count = entries.len() as i64;
        let result = self.store.set_many(entries).await;
        match result {
            Ok(()) => metric!(
                counter("levelcache.remote.store") += count,
                "cache" => &self.name,
                "status" => "ok",
            ),
            Err(ref e) => metric!(
                counter("levelcache.remote.store") += count,
                "cache" => &self.name,
                "status" => "error",
                "errdetails" => e.metrics_tag(),
            ),
        }
        result
    }

    /// Deletes all `keys` in one round trip.
    pub async fn delete_many(&self, keys: &[String]) -> Result<(), RemoteError> {
        if keys.is_empty() {
            return Ok(());
        }
        let store_keys: Vec<_> = keys.iter().map(|key| self.namespaced(key)).collect();
        self.store.delete_many(&store_keys).await
    }

    fn entry(&self, key: &str, record: &Record, ttl: Duration) -> Option<StoreEntry> {
        match codec::encode(record, self.compression) {
            Ok(value) => Some(StoreEntry {
                key: self.namespaced(key),
                value,
                ttl,
            }),
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    key,
                    "Failed to encode item for remote tier"
                );
                None
            }
        }
    }
}
