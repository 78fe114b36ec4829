use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use levelcache::config::{LocalTierConfig, RemoteTierConfig};
use levelcache::{
    CacheOptions, Compression, Loader, RemoteStore, RemoteTierOptions, TieredCache,
};
use levelcache_test::KeyRecorder;

pub fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| key.to_string()).collect()
}

pub fn values(values: &[(&str, &str)]) -> HashMap<String, Bytes> {
    values
        .iter()
        .map(|(key, value)| (key.to_string(), Bytes::from(value.to_string())))
        .collect()
}

/// A loader that answers every key starting with `user:` and records its calls.
pub fn user_loader(recorder: &KeyRecorder) -> Arc<dyn Loader> {
    let recorder = recorder.clone();
    let loader = move |keys: Vec<String>| {
        recorder.record(&keys);
        async move {
            let found: HashMap<String, Bytes> = keys
                .into_iter()
                .filter(|key| key.starts_with("user:"))
                .map(|key| {
                    let value = Bytes::from(format!("profile of {key}"));
                    (key, value)
                })
                .collect();
            Ok::<_, anyhow::Error>(found)
        }
    };
    Arc::new(loader)
}

pub fn two_tier_cache(
    store: Arc<dyn RemoteStore>,
    loader: Arc<dyn Loader>,
    compression: Compression,
) -> TieredCache {
    let options = CacheOptions {
        local: Some(LocalTierConfig {
            capacity: 1000,
            fresh_ttl: Duration::from_millis(300),
            negative_ttl: Duration::from_millis(100),
        }),
        remote: Some(RemoteTierOptions {
            store,
            config: RemoteTierConfig {
                prefix: "users".into(),
                hard_ttl: Duration::from_secs(5),
                soft_ttl: Duration::from_secs(2),
                miss_ttl: Duration::from_millis(100),
            },
        }),
        loader: Some(loader),
        compression,
    };
    TieredCache::new("users", options).unwrap()
}
