use std::fs;

use levelcache::{Config, TieredCache};
use levelcache_test::KeyRecorder;

use crate::{keys, user_loader, values};

#[tokio::test]
async fn test_from_config_file() {
    levelcache_test::setup();
    let dir = levelcache_test::tempdir();
    let path = dir.path().join("config.yml");
    fs::write(
        &path,
        "local:\n  capacity: 100\n  fresh_ttl: 1m\n  negative_ttl: 5s\ncompression: zstd\n",
    )
    .unwrap();

    let config = Config::get(Some(&path)).unwrap();
    let recorder = KeyRecorder::new();
    let cache = TieredCache::from_config("users", &config, Some(user_loader(&recorder)))
        .await
        .unwrap();
    assert_eq!(cache.name(), "users");

    let lookup = cache.mget(&keys(&["user:1"])).await;
    assert_eq!(lookup.values, values(&[("user:1", "profile of user:1")]));
    let lookup = cache.mget(&keys(&["user:1"])).await;
    assert_eq!(lookup.values.len(), 1);
    assert_eq!(recorder.calls(), 1);
}

#[tokio::test]
async fn test_from_config_rejects_invalid_tiers() {
    let dir = levelcache_test::tempdir();
    let path = dir.path().join("config.yml");
    fs::write(&path, "local:\n  capacity: 0\n  fresh_ttl: 1m\n").unwrap();

    let config = Config::get(Some(&path)).unwrap();
    let err = TieredCache::from_config("users", &config, None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "local tier capacity must be positive");

    let config = Config::default();
    assert!(
        TieredCache::from_config("users", &config, None)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_from_config_unreachable_redis() {
    let yaml = "remote:\n  prefix: users\n  hard_ttl: 1m\n  soft_ttl: 30s\n  redis:\n    url: redis://127.0.0.1:1\n    connect_timeout: 200ms\n";
    let dir = levelcache_test::tempdir();
    let path = dir.path().join("config.yml");
    fs::write(&path, yaml).unwrap();

    let config = Config::get(Some(&path)).unwrap();
    let recorder = KeyRecorder::new();
    let loader = Some(user_loader(&recorder));
    assert!(
        TieredCache::from_config("users", &config, loader)
            .await
            .is_err()
    );
}
