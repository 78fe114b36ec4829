use std::sync::Arc;
use std::time::Duration;

use levelcache::config::RedisConfig;
use levelcache::{Compression, RedisStore};
use levelcache_test::KeyRecorder;

use crate::{keys, two_tier_cache, user_loader, values};

#[tokio::test]
async fn test_redis_tier() {
    levelcache_test::setup();
    let config = RedisConfig {
        url: levelcache_test::redis_url!(),
        connect_timeout: Duration::from_secs(1),
        io_timeout: Duration::from_secs(1),
    };
    let store = Arc::new(RedisStore::connect(&config).await.unwrap());
    let recorder = KeyRecorder::new();

    let first = two_tier_cache(store.clone(), user_loader(&recorder), Compression::Zstd);
    first
        .mdel(&keys(&["user:redis", "group:redis"]))
        .await
        .unwrap();

    let lookup = first.mget(&keys(&["user:redis", "group:redis"])).await;
    assert!(lookup.error.is_none());
    assert_eq!(
        lookup.values,
        values(&[("user:redis", "profile of user:redis")])
    );
    assert_eq!(recorder.take().len(), 1);

    let second = two_tier_cache(store, user_loader(&recorder), Compression::Zstd);
    let lookup = second.mget(&keys(&["user:redis", "group:redis"])).await;
    assert_eq!(lookup.values.len(), 1);
    assert_eq!(recorder.calls(), 0);

    second
        .mdel(&keys(&["user:redis", "group:redis"]))
        .await
        .unwrap();
}
