use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tickers: Vec<String>,
    max_count: usize,
    bucket: i64,
}

impl CacheKey {
    /// `bucket_secs` must be > 0; requests in the same window share a key.
    pub fn new(
        tickers: &BTreeSet<String>,
        max_count: usize,
        now: DateTime<Utc>,
        bucket_secs: i64,
    ) -> Self {
        Self {
            tickers: tickers.iter().cloned().collect(),
            max_count,
            bucket: now.timestamp().div_euclid(bucket_secs.max(1)),
        }
    }
}

/// Per-key memo where concurrent callers for the same key wait on one build.
///
/// A failed build leaves the cell empty so the next caller retries. Entries from
/// older time buckets are evicted whenever a new bucket shows up.
pub struct SingleFlightCache<V> {
    cells: Mutex<HashMap<CacheKey, Arc<OnceCell<V>>>>,
}

impl<V> Default for SingleFlightCache<V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> SingleFlightCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_init<F, Fut, E>(&self, key: CacheKey, build: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            cells.retain(|k, _| k.bucket >= key.bucket);
            cells.entry(key).or_default().clone()
        };
        cell.get_or_try_init(build).await.cloned()
    }

    pub fn len(&self) -> usize {
        self.cells
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::t0;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(tickers: &[&str], at: DateTime<Utc>) -> CacheKey {
        let set: BTreeSet<String> = tickers.iter().map(|t| t.to_string()).collect();
        CacheKey::new(&set, 50, at, 60)
    }

    #[test]
    fn key_ignores_ticker_order_and_buckets_time() {
        assert_eq!(key(&["B", "A"], t0()), key(&["A", "B"], t0()));
        assert_eq!(
            key(&["A"], t0()),
            key(&["A"], t0() + chrono::Duration::seconds(30))
        );
        assert_ne!(
            key(&["A"], t0()),
            key(&["A"], t0() + chrono::Duration::seconds(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_requests_build_once() {
        let cache: Arc<SingleFlightCache<u32>> = Arc::new(SingleFlightCache::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_init(key(&["AAPL"], t0()), || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, String>(7)
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(7));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_build_is_retried() {
        let cache: SingleFlightCache<u32> = SingleFlightCache::new();
        let first = cache
            .get_or_try_init(key(&["AAPL"], t0()), || async { Err::<u32, _>("boom") })
            .await;
        assert_eq!(first, Err("boom"));
        let second = cache
            .get_or_try_init(key(&["AAPL"], t0()), || async { Ok::<_, &str>(3) })
            .await;
        assert_eq!(second, Ok(3));
    }

    #[tokio::test]
    async fn new_bucket_evicts_old_entries() {
        let cache: SingleFlightCache<u32> = SingleFlightCache::new();
        let _ = cache
            .get_or_try_init(key(&["A"], t0()), || async { Ok::<_, ()>(1) })
            .await;
        let _ = cache
            .get_or_try_init(key(&["B"], t0()), || async { Ok::<_, ()>(2) })
            .await;
        assert_eq!(cache.len(), 2);

        let later = t0() + chrono::Duration::minutes(5);
        let _ = cache
            .get_or_try_init(key(&["A"], later), || async { Ok::<_, ()>(3) })
            .await;
        assert_eq!(cache.len(), 1);
    }
}
