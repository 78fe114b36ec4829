use std::sync::Arc;
use std::time::Duration;

use levelcache::{Compression, MemoryStore};
use levelcache_test::KeyRecorder;

use crate::{keys, two_tier_cache, user_loader, values};

#[tokio::test]
async fn test_shared_remote_tier() {
    levelcache_test::setup();
    let store = Arc::new(MemoryStore::new());
    let recorder = KeyRecorder::new();

    let first = two_tier_cache(store.clone(), user_loader(&recorder), Compression::Snappy);
    let second = two_tier_cache(store.clone(), user_loader(&recorder), Compression::Zstd);

    let lookup = first.mget(&keys(&["user:1", "user:2", "group:1"])).await;
    assert!(lookup.error.is_none());
    assert_eq!(
        lookup.values,
        values(&[("user:1", "profile of user:1"), ("user:2", "profile of user:2")])
    );
    assert_eq!(
        recorder.take(),
        vec![keys(&["group:1", "user:1", "user:2"])]
    );

    // the second process finds both the values and the miss in the remote tier
    let lookup = second.mget(&keys(&["user:1", "user:2", "group:1"])).await;
    assert_eq!(lookup.values.len(), 2);
    assert!(lookup.valid.values().all(|valid| *valid));
    assert!(!lookup.valid.contains_key("group:1"));
    assert_eq!(recorder.calls(), 0);
}

#[tokio::test]
async fn test_writes_and_deletes_are_shared() {
    levelcache_test::setup();
    let store = Arc::new(MemoryStore::new());
    let recorder = KeyRecorder::new();

    let first = two_tier_cache(store.clone(), user_loader(&recorder), Compression::None);
    let second = two_tier_cache(store.clone(), user_loader(&recorder), Compression::None);

    first
        .mset(&values(&[("user:1", "renamed")]))
        .await
        .unwrap();
    let lookup = second.mget(&keys(&["user:1"])).await;
    assert_eq!(lookup.values, values(&[("user:1", "renamed")]));
    assert_eq!(recorder.calls(), 0);

    // the second cache keeps its local copy until that expires
    first.mdel(&keys(&["user:1"])).await.unwrap();
    assert!(store.is_empty());
    let lookup = second.mget(&keys(&["user:1"])).await;
    assert_eq!(lookup.values, values(&[("user:1", "renamed")]));

    tokio::time::sleep(Duration::from_millis(310)).await;
    let lookup = second.mget(&keys(&["user:1"])).await;
    assert_eq!(lookup.values, values(&[("user:1", "profile of user:1")]));
    assert_eq!(recorder.take(), vec![keys(&["user:1"])]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups() {
    levelcache_test::setup();
    let store = Arc::new(MemoryStore::new());
    let recorder = KeyRecorder::new();
    let cache = Arc::new(two_tier_cache(
        store.clone(),
        user_loader(&recorder),
        Compression::Snappy,
    ));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let keys = vec![format!("user:{}", i % 4), format!("user:{}", i % 4 + 4)];
                cache.mget(&keys).await
            })
        })
        .collect();

    for task in tasks {
        let lookup = task.await.unwrap();
        assert!(lookup.error.is_none());
        assert_eq!(lookup.values.len(), 2);
        for (key, value) in &lookup.values {
            assert_eq!(value, format!("profile of {key}").as_bytes());
        }
    }

    // every key was loaded at least once, concurrent misses may load a key twice
    let loaded: usize = recorder.take().iter().map(Vec::len).sum();
    assert!(loaded >= 8);

    let lookup = cache.mget(&keys(&["user:0", "user:7"])).await;
    assert_eq!(lookup.values.len(), 2);
    assert_eq!(recorder.calls(), 0);
}
