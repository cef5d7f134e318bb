//! End-to-end coverage of the response cache region under concurrent
//! access: the CAS lock must serialize writers, and a reader racing a
//! writer must see either the old valid body or a clean miss, never a
//! torn one.

use std::sync::Arc;
use std::time::Duration;

use pgexporter::cache::CacheRegion;

#[tokio::test]
async fn concurrent_acquire_serializes_writers() {
    let cache = Arc::new(CacheRegion::new(4096));

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let guard = cache.acquire(Duration::from_secs(1)).await.unwrap();
            cache.invalidate(&guard);
            let body = vec![i; 16];
            assert!(cache.append(&guard, &body));
            assert!(cache.finalize(&guard, Duration::from_secs(30)));
            // Whatever is in the cache when read back under our own guard
            // must be exactly what we wrote: no other task's write could
            // have interleaved while we held the lock.
            assert_eq!(cache.body(&guard).unwrap(), body);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let guard = cache.acquire(Duration::from_secs(1)).await.unwrap();
    assert!(cache.is_valid(&guard));
}

#[tokio::test]
async fn scrape_then_serve_from_cache_round_trip() {
    let cache = CacheRegion::new(1024);

    // First "scrape": miss, populate.
    {
        let guard = cache.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(cache.body(&guard).is_none());
        cache.invalidate(&guard);
        assert!(cache.append(&guard, b"pgexporter_up 1\n"));
        assert!(cache.finalize(&guard, Duration::from_secs(60)));
    }

    // Second request: hit, same bytes, no re-scrape needed.
    {
        let guard = cache.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(cache.body(&guard).unwrap(), b"pgexporter_up 1\n");
    }
}

#[tokio::test]
async fn acquire_times_out_while_lock_is_held() {
    let cache = CacheRegion::new(64);
    let held = cache.acquire(Duration::from_secs(5)).await.unwrap();

    let err = cache.acquire(Duration::from_millis(20)).await;
    assert!(err.is_err());
    drop(held);
}
