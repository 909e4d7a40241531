use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use assert_matches::assert_matches;
use bytes::Bytes;
use sitepack_cache::{ContentCache, ContentCacheError, DirectorySource, Loaded};
use tokio::sync::Notify;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_load_once() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let cache = ContentCache::new(1 << 24, move |_key: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, std::io::Error>(Loaded::from(b"0123456789".to_vec()))
        }
    });

    let (a, b) = tokio::join!(cache.get("x".to_string()), cache.get("x".to_string()));
    assert_eq!(a.unwrap(), Bytes::from_static(b"0123456789"));
    assert_eq!(b.unwrap(), Bytes::from_static(b"0123456789"));
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    let c = cache.get("x".to_string()).await.unwrap();
    assert_eq!(c.len(), 10);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tasks_share_one_load() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let cache = ContentCache::new(1 << 24, move |key: u64| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, std::io::Error>(Loaded::from(key.to_le_bytes().to_vec()))
        }
    });

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(7).await })
        })
        .collect();

    for task in tasks {
        let blob = task.await.unwrap().unwrap();
        assert_eq!(&blob[..], &7u64.to_le_bytes()[..]);
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

fn slow_cache(capacity: u64) -> (ContentCache<u32>, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let cache = ContentCache::new(capacity, move |key: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if key >= 100 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok::<_, std::io::Error>(Loaded::from(vec![key as u8; 10]))
        }
    });
    (cache, loads)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_share_a_load_that_is_too_large_to_keep() {
    let (cache, loads) = slow_cache(5);

    let (a, b, c) = tokio::join!(cache.get(100), cache.get(100), cache.get(100));
    for blob in [a, b, c] {
        assert_eq!(blob.unwrap(), Bytes::from(vec![100u8; 10]));
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(!cache.contains(&100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_share_a_load_that_a_full_cache_rejects() {
    let (cache, loads) = slow_cache(100);

    // Fill the cache with keys that are requested often enough that a new key
    // is not admitted in their place.
    for _ in 0..20 {
        for key in 0..10 {
            cache.get(key).await.unwrap();
        }
    }
    let warm_loads = loads.load(Ordering::SeqCst);

    let (a, b) = tokio::join!(cache.get(200), cache.get(200));
    assert_eq!(a.unwrap(), Bytes::from(vec![200u8; 10]));
    assert_eq!(b.unwrap(), Bytes::from(vec![200u8; 10]));
    assert_eq!(loads.load(Ordering::SeqCst), warm_loads + 1);
    assert!(cache.resident_cost().await <= 100);
}

#[tokio::test]
async fn test_failed_load_is_not_cached() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let cache = ContentCache::new(1024, move |_key: &'static str| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))
            } else {
                Ok(Loaded::from(b"found".to_vec()))
            }
        }
    });

    let err = cache.get("page").await.unwrap_err();
    assert_matches!(&err, ContentCacheError::LoadFailure { key, .. } if key == "\"page\"");
    assert!(!cache.contains(&"page"));
    assert_eq!(cache.resident_cost().await, 0);

    assert_eq!(&cache.get("page").await.unwrap()[..], b"found");
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert!(cache.contains(&"page"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_observe_the_failed_load() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let cache = ContentCache::new(1024, move |_key: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err::<Loaded, _>(std::io::Error::other("backend down"))
        }
    });

    let (a, b, c) = tokio::join!(cache.get(1), cache.get(1), cache.get(1));
    assert!(a.is_err());
    assert!(b.is_err());
    assert!(c.is_err());
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_keys_do_not_block_each_other() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let cache = ContentCache::new(1024, move |key: &'static str| {
        let gate = gate.clone();
        async move {
            if key == "slow" {
                gate.notified().await;
            }
            Ok::<_, std::io::Error>(Loaded::from(key.as_bytes().to_vec()))
        }
    });

    let slow = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get("slow").await }
    });

    let fast = tokio::time::timeout(Duration::from_secs(5), cache.get("fast"))
        .await
        .expect("an unrelated load must not block")
        .unwrap();
    assert_eq!(&fast[..], b"fast");

    release.notify_one();
    assert_eq!(&slow.await.unwrap().unwrap()[..], b"slow");
}

#[tokio::test]
async fn test_resident_cost_stays_within_capacity() {
    let cache = ContentCache::new(100, |key: u32| async move {
        let size = 10 + (key as usize % 4) * 10;
        Ok::<_, std::io::Error>(Loaded::from(vec![0u8; size]))
    });

    for round in 0..3 {
        for key in 0..40 {
            let blob = cache.get(key).await.unwrap();
            assert_eq!(blob.len(), 10 + (key as usize % 4) * 10, "round {round}");
            assert!(cache.resident_cost().await <= cache.capacity());
        }
    }
}

#[tokio::test]
async fn test_custom_cost_is_used() {
    let cache = ContentCache::new(10, |_key: u32| async {
        Ok::<_, std::io::Error>(Loaded {
            blob: Bytes::from_static(b"tiny"),
            cost: 6,
        })
    });

    cache.get(1).await.unwrap();
    assert_eq!(cache.resident_cost().await, 6);
    cache.get(2).await.unwrap();
    assert!(cache.resident_cost().await <= 10);
    assert_eq!(cache.entry_count().await, 1);
}

#[tokio::test]
async fn test_cache_from_directory_source() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
    std::fs::create_dir(dir.path().join("assets")).unwrap();

    let cache = ContentCache::from_source(1 << 20, Arc::new(DirectorySource::new(dir.path())));
    let blob = cache.get("/index.html".to_string()).await.unwrap();
    assert_eq!(&blob[..], b"<h1>hi</h1>");
    assert_eq!(cache.resident_cost().await, 11);

    assert!(cache.get("/assets".to_string()).await.is_err());
    assert!(cache.get("/missing.html".to_string()).await.is_err());
    assert_eq!(cache.entry_count().await, 1);
}
