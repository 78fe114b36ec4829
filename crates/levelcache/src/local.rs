//! The bounded in-process tier.

use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::codec::{self, Compression, Record};
use crate::config::{LocalTierConfig, MIN_TTL};

/// An item saved in the in-memory moka cache.
#[derive(Clone, Debug)]
struct LocalItem {
    /// When this item turns stale. It stays readable until moka evicts it.
    deadline: Instant,
    /// The encoded envelope.
    data: Bytes,
}

type InMemoryCache = moka::sync::Cache<String, LocalItem>;

/// A record read from the local tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalLookup {
    pub record: Record,
    /// Whether the record outlived the TTL it was stored with.
    pub expired: bool,
}

/// Wraps a capacity-bounded moka cache with per-item TTLs.
///
/// Items past their TTL are not evicted, they are returned flagged as expired so the caller
/// can still use them as a fallback. Capacity pressure is the only thing removing items.
#[derive(Clone)]
pub struct LocalTier {
    cache: InMemoryCache,
    config: LocalTierConfig,
    compression: Compression,
}

impl std::fmt::Debug for LocalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTier")
            .field("config", &self.config)
            .field("compression", &self.compression)
            .field("in-memory items", &self.cache.entry_count())
            .finish()
    }
}

impl LocalTier {
    pub fn new(name: &str, config: LocalTierConfig, compression: Compression) -> Self {
        let cache = InMemoryCache::builder()
            .max_capacity(config.capacity)
            .name(name)
            .build();

        LocalTier {
            cache,
            config,
            compression,
        }
    }

    /// Looks up `key`, regardless of whether it is expired.
    ///
    /// Items that fail to decode are reported as absent.
    pub fn get(&self, key: &str) -> Option<LocalLookup> {
        let item = self.cache.get(key)?;
        let record = match codec::decode(&item.data) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    key,
                    "Malformed item in local tier"
                );
                return None;
            }
        };

        Some(LocalLookup {
            record,
            expired: item.deadline <= Instant::now(),
        })
    }

    /// Stores a record that stays fresh for the configured fresh TTL.
    pub fn set_fresh(&self, key: &str, record: &Record) {
        self.insert(key, record, self.config.fresh_ttl);
    }

    /// Remembers a loader miss for the configured negative TTL.
    ///
    /// Does nothing if negative caching is disabled.
    pub fn set_miss(&self, key: &str, written_at: DateTime<Utc>) {
        if self.config.negative_ttl < MIN_TTL {
            return;
        }
        self.insert(key, &Record::miss(written_at), self.config.negative_ttl);
    }

    pub fn delete(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    fn insert(&self, key: &str, record: &Record, ttl: Duration) {
        let data = match codec::encode(record, self.compression) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    key,
                    "Failed to encode item for local tier"
                );
                return;
            }
        };
        let item = LocalItem {
            deadline: Instant::now() + ttl,
            data,
        };
        self.cache.insert(key.to_owned(), item);
    }
}
