//! An async-safe layer on top of [`crate::lru_cache::LruCache`]. Concurrent
//! callers asking for the same key while a fetch is already in flight share
//! its result instead of issuing redundant work - see
//! [`proxmox_async::broadcast_future::BroadcastFuture`], the same crate
//! `pbs-tools/src/async_lru_cache.rs` pulls this from rather than keeping a
//! local copy.
//!
//! Every cached value is stamped with the tick it was fetched at, so callers
//! with a staleness budget (the chunk reader's `refresh_ticks`) can force a
//! refetch without needing a second cache.

use anyhow::Error;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use proxmox_async::broadcast_future::BroadcastFuture;

use crate::lru_cache::LruCache;

/// Interface for asynchronously getting values on cache misses.
pub trait AsyncCacher<K, V: Clone>: Sync + Send {
    /// Fetch a value for key on cache miss or forced refresh.
    fn fetch(&self, key: K) -> Box<dyn Future<Output = Result<Option<V>, Error>> + Send>;
}

#[derive(Clone)]
struct Stamped<V> {
    value: V,
    fetched_at_tick: u64,
}

/// Async-safe cache with per-entry freshness tracked in abstract "ticks"
/// (the caller decides what a tick is - the chunk reader uses one tick per
/// periodic refresh pass).
#[derive(Clone)]
pub struct AsyncLruCache<K, V> {
    #[allow(clippy::type_complexity)]
    maps: Arc<Mutex<(LruCache<K, Stamped<V>>, HashMap<K, BroadcastFuture<Option<V>>>)>>,
}

impl<K: std::cmp::Eq + std::hash::Hash + Copy, V: Clone + Send + 'static> AsyncLruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            maps: Arc::new(Mutex::new((LruCache::new(capacity), HashMap::new()))),
        }
    }

    /// Access an item, fetching on a miss or when the cached entry is older
    /// than `max_age_ticks` relative to `now_tick`. A return value of
    /// `Ok(None)` means the fetch legitimately found nothing; `Err(_)` means
    /// the fetch failed, regardless of who triggered it.
    pub async fn access(
        &self,
        key: K,
        now_tick: u64,
        max_age_ticks: u64,
        cacher: &dyn AsyncCacher<K, V>,
    ) -> Result<Option<V>, Error> {
        let (owner, result_fut) = {
            let mut maps = self.maps.lock().unwrap();
            if let Some(fut) = maps.1.get(&key) {
                (false, fut.listen())
            } else {
                if let Some(entry) = maps.0.get_mut(key) {
                    if now_tick.saturating_sub(entry.fetched_at_tick) < max_age_ticks {
                        return Ok(Some(entry.value.clone()));
                    }
                }

                let fut = cacher.fetch(key);
                let broadcast = BroadcastFuture::new(fut);
                let result_fut = broadcast.listen();
                maps.1.insert(key, broadcast);
                (true, result_fut)
            }
        };

        let result = result_fut.await;

        if owner {
            let mut maps = self.maps.lock().unwrap();
            if let Ok(Some(ref value)) = result {
                maps.0.insert(
                    key,
                    Stamped {
                        value: value.clone(),
                        fetched_at_tick: now_tick,
                    },
                );
            }
            maps.1.remove(&key);
        }

        result
    }

    /// Drop a cached entry so the next access always refetches; used when a
    /// read fails and the reader wants a fresh chunk location immediately.
    pub fn invalidate(&self, key: K) {
        self.maps.lock().unwrap().0.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestAsyncCacher {
        prefix: &'static str,
    }

    impl AsyncCacher<i32, String> for TestAsyncCacher {
        fn fetch(
            &self,
            key: i32,
        ) -> Box<dyn Future<Output = Result<Option<String>, Error>> + Send> {
            let x = self.prefix;
            Box::new(async move { Ok(Some(format!("{}{}", x, key))) })
        }
    }

    #[tokio::test]
    async fn fresh_entry_is_served_from_cache() {
        let cacher = TestAsyncCacher { prefix: "x" };
        let cache: AsyncLruCache<i32, String> = AsyncLruCache::new(4);

        assert_eq!(
            cache.access(10, 0, 100, &cacher).await.unwrap(),
            Some("x10".to_string())
        );

        let cacher2 = TestAsyncCacher { prefix: "y" };
        // still fresh at tick 5 with max_age 100 -> old value served, not "y10"
        assert_eq!(
            cache.access(10, 5, 100, &cacher2).await.unwrap(),
            Some("x10".to_string())
        );
    }

    #[tokio::test]
    async fn stale_entry_forces_refetch() {
        let cacher = TestAsyncCacher { prefix: "x" };
        let cache: AsyncLruCache<i32, String> = AsyncLruCache::new(4);

        cache.access(10, 0, 1, &cacher).await.unwrap();

        let cacher2 = TestAsyncCacher { prefix: "y" };
        assert_eq!(
            cache.access(10, 5, 1, &cacher2).await.unwrap(),
            Some("y10".to_string())
        );
    }

    #[tokio::test]
    async fn invalidate_forces_refetch_regardless_of_age() {
        let cacher = TestAsyncCacher { prefix: "x" };
        let cache: AsyncLruCache<i32, String> = AsyncLruCache::new(4);

        cache.access(10, 0, 100, &cacher).await.unwrap();
        cache.invalidate(10);

        let cacher2 = TestAsyncCacher { prefix: "y" };
        assert_eq!(
            cache.access(10, 1, 100, &cacher2).await.unwrap(),
            Some("y10".to_string())
        );
    }
}
