use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::codec::{Compression, Payload, Record};
use crate::config::{self, Config, ConfigError, LocalTierConfig, RemoteTierConfig};
use crate::error::Error;
use crate::loader::Loader;
use crate::local::{LocalLookup, LocalTier};
use crate::remote::{RedisStore, RemoteStore, RemoteTier};

/// The remote tier of a [`TieredCache`]: a store plus the settings applied on top of it.
#[derive(Debug, Clone)]
pub struct RemoteTierOptions {
    pub store: Arc<dyn RemoteStore>,
    pub config: RemoteTierConfig,
}

/// Everything needed to construct a [`TieredCache`].
///
/// At least one of `local` and `remote` has to be set.
#[derive(Default)]
pub struct CacheOptions {
    pub local: Option<LocalTierConfig>,
    pub remote: Option<RemoteTierOptions>,
    pub loader: Option<Arc<dyn Loader>>,
    pub compression: Compression,
}

/// The outcome of [`TieredCache::mget`].
///
/// Every key with a value is in both `values` and `valid`. `valid` tells whether the value is
/// fresh or a stale fallback. Keys that are in neither map are misses, either confirmed by a
/// miss marker or the loader, or because nothing could produce a value.
#[derive(Debug, Default)]
pub struct Lookup {
    pub values: HashMap<String, Bytes>,
    pub valid: HashMap<String, bool>,
    /// Set when the loader or the write-back of loaded values failed.
    ///
    /// Values that were found before the failure are still returned.
    pub error: Option<Error>,
}

impl Lookup {
    fn insert(&mut self, key: &str, value: Bytes, valid: bool) {
        self.values.insert(key.to_owned(), value);
        self.valid.insert(key.to_owned(), valid);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
        self.valid.remove(key);
    }
}

/// Hands out write timestamps that never go backwards within one cache.
#[derive(Debug, Default)]
struct WriteClock {
    last: AtomicI64,
}

impl WriteClock {
    fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let millis = self.last.fetch_max(now, Ordering::Relaxed).max(now);
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}

/// A read-through, write-through cache in front of a [`Loader`].
///
/// Lookups consult the local tier, then the remote tier, then the loader, and fill the faster
/// tiers with whatever a slower one produced. Stale values are kept as fallbacks in case the
/// slower layers come up empty.
pub struct TieredCache {
    name: String,
    local: Option<LocalTier>,
    remote: Option<RemoteTier>,
    loader: Option<Arc<dyn Loader>>,
    clock: WriteClock,
}

impl fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.name)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

impl TieredCache {
    pub fn new(name: impl Into<String>, options: CacheOptions) -> Result<Self, ConfigError> {
        let name = name.into();
        config::validate(
            &name,
            options.local.as_ref(),
            options.remote.as_ref().map(|remote| &remote.config),
        )?;

        let local = options
            .local
            .map(|local| LocalTier::new(&name, local, options.compression));
        let remote = options.remote.map(|remote| {
            RemoteTier::new(&name, remote.store, remote.config, options.compression)
        });

        Ok(TieredCache {
            name,
            local,
            remote,
            loader: options.loader,
            clock: WriteClock::default(),
        })
    }

    /// Creates a cache from a config file section, connecting to Redis if a remote tier is
    /// configured.
    pub async fn from_config(
        name: impl Into<String>,
        config: &Config,
        loader: Option<Arc<dyn Loader>>,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        config.validate(&name)?;

        let remote = match config.remote {
            Some(ref remote) => {
                let store = RedisStore::connect(&remote.redis)
                    .await
                    .context("failed to set up the remote tier")?;
                Some(RemoteTierOptions {
                    store: Arc::new(store),
                    config: remote.tier.clone(),
                })
            }
            None => None,
        };

        let options = CacheOptions {
            local: config.local,
            remote,
            loader,
            compression: config.compression,
        };
        Ok(Self::new(name, options)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up `keys`, loading whatever no tier can answer.
    ///
    /// Duplicate keys are looked up once. An empty `keys` returns an empty [`Lookup`] without
    /// touching any tier.
    pub async fn mget(&self, keys: &[String]) -> Lookup {
        let mut lookup = Lookup::default();
        if keys.is_empty() {
            return lookup;
        }

        let mut seen = HashSet::with_capacity(keys.len());
        let keys: Vec<&str> = keys
            .iter()
            .map(String::as_str)
            .filter(|key| seen.insert(*key))
            .collect();
        metric!(counter("levelcache.access") += keys.len() as i64, "cache" => &self.name);

        let pending = self.get_local(&keys, &mut lookup);
        let pending = self.get_remote(pending, &mut lookup).await;
        if pending.is_empty() {
            return lookup;
        }

        let Some(ref loader) = self.loader else {
            return lookup;
        };

        let start = Instant::now();
        metric!(counter("levelcache.loader.calls") += 1, "cache" => &self.name);
        metric!(histogram("levelcache.loader.keys") = pending.len() as u64, "cache" => &self.name);
        let result = loader.load(&pending).await;
        metric!(timer("levelcache.loader.duration") = start.elapsed(), "cache" => &self.name);

        let loaded = match result {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::warn!(
                    error = &*err as &dyn std::error::Error,
                    keys = pending.len(),
                    "Loader failed for cache {}",
                    self.name,
                );
                lookup.error = Some(Error::Loader(err));
                return lookup;
            }
        };

        let misses: Vec<String> = pending
            .into_iter()
            .filter(|key| !loaded.contains_key(key))
            .collect();
        for key in &misses {
            lookup.remove(key);
        }
        for (key, value) in &loaded {
            lookup.insert(key, value.clone(), true);
        }

        if let Err(err) = self.write_back(&loaded, &misses).await {
            lookup.error = Some(err);
        }
        lookup
    }

    /// Writes `values` to every tier, as if the loader had produced them.
    pub async fn mset(&self, values: &HashMap<String, Bytes>) -> Result<(), Error> {
        self.write_back(values, &[]).await
    }

    /// Removes `keys` from every tier.
    ///
    /// Local deletions are not rolled back when the remote tier fails.
    pub async fn mdel(&self, keys: &[String]) -> Result<(), Error> {
        if keys.is_empty() {
            return Ok(());
        }
        if let Some(ref local) = self.local {
            for key in keys {
                local.delete(key);
            }
        }
        if let Some(ref remote) = self.remote {
            remote.delete_many(keys).await.map_err(|err| {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "Failed to delete from remote tier of cache {}",
                    self.name,
                );
                Error::RemoteDelete(err)
            })?;
        }
        Ok(())
    }

    /// Consults the local tier.
    ///
    /// Returns the keys that need to be looked up further down.
    fn get_local(&self, keys: &[&str], lookup: &mut Lookup) -> Vec<String> {
        let Some(ref local) = self.local else {
            return keys.iter().map(|key| key.to_string()).collect();
        };

        let mut pending = Vec::new();
        let (mut hits, mut stale, mut misses) = (0i64, 0i64, 0i64);
        for &key in keys {
            let Some(LocalLookup { record, expired }) = local.get(key) else {
                pending.push(key.to_owned());
                continue;
            };
            match record.payload {
                Payload::Miss if !expired => misses += 1,
                Payload::Miss => pending.push(key.to_owned()),
                Payload::Present(value) if !expired => {
                    hits += 1;
                    lookup.insert(key, value, true);
                }
                Payload::Present(value) => {
                    stale += 1;
                    lookup.insert(key, value, false);
                    pending.push(key.to_owned());
                }
            }
        }

        metric!(counter("levelcache.local.hit") += hits, "cache" => &self.name);
        metric!(counter("levelcache.local.stale") += stale, "cache" => &self.name);
        metric!(counter("levelcache.local.miss_marker") += misses, "cache" => &self.name);
        metric!(gauge("levelcache.local.entries") = local.entry_count(), "cache" => &self.name);
        pending
    }

    /// Consults the remote tier, warming the local tier with fresh records.
    ///
    /// Returns the keys that need to be loaded.
    async fn get_remote(&self, pending: Vec<String>, lookup: &mut Lookup) -> Vec<String> {
        let Some(ref remote) = self.remote else {
            return pending;
        };
        if pending.is_empty() {
            return pending;
        }

        let mut records = remote.get_many(&pending).await;
        let now = Utc::now();
        let mut carried = Vec::new();
        for key in pending {
            let Some(record) = records.remove(&key) else {
                carried.push(key);
                continue;
            };
            let has_candidate = lookup.values.contains_key(&key);
            let age = record.age(now);

            let value = match record.payload {
                Payload::Miss => {
                    lookup.remove(&key);
                    continue;
                }
                Payload::Present(value) => value,
            };

            if age <= remote.soft_ttl() {
                if let Some(ref local) = self.local {
                    local.set_fresh(&key, &Record::present(value.clone(), record.written_at));
                }
                if !has_candidate {
                    lookup.insert(&key, value, true);
                    continue;
                }
            } else if !has_candidate {
                lookup.insert(&key, value, false);
            }
            carried.push(key);
        }
        carried
    }

    /// Stores loaded values and misses in every tier under one write timestamp.
    async fn write_back(
        &self,
        values: &HashMap<String, Bytes>,
        misses: &[String],
    ) -> Result<(), Error> {
        if values.is_empty() && misses.is_empty() {
            return Ok(());
        }
        let written_at = self.clock.stamp();

        if let Some(ref local) = self.local {
            for (key, value) in values {
                local.set_fresh(key, &Record::present(value.clone(), written_at));
            }
            for key in misses {
                local.set_miss(key, written_at);
            }
        }

        if let Some(ref remote) = self.remote {
            remote
                .set_many(values, misses, written_at)
                .await
                .map_err(|err| {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        "Failed to write to remote tier of cache {}",
                        self.name,
                    );
                    Error::RemoteWrite(err)
                })?;
        }
        Ok(())
    }
}
