//! The single-flight caching step.

use super::{CacheConfig, CacheKey, CacheStats, CacheStatsSnapshot, CacheStore, MemoryStore};
use crate::context::Context;
use crate::errors::{CacheStoreError, StepError};
use crate::steps::{BoxStep, Step};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Outcome slot shared between the leader and its waiters.
type Outcome<O> = Option<Result<O, StepError>>;
type InFlight<O> = Mutex<HashMap<CacheKey, watch::Sender<Outcome<O>>>>;
type KeyFn<I> = Arc<dyn Fn(&I) -> Result<CacheKey, CacheStoreError> + Send + Sync>;

enum Lookup<O> {
    Hit(O),
    Wait(watch::Receiver<Outcome<O>>),
    Lead,
    StoreFailed(CacheStoreError),
}

/// Memoizes a step by input with bounded size, bounded age and
/// single-flight deduplication.
///
/// For each key at most one invocation of the wrapped step runs at a time.
/// Callers arriving while it runs wait for its outcome instead of invoking
/// the step again. Only successes are stored; a failure is handed to the
/// waiters and the next caller retries from scratch.
///
/// Clones share the store, the in-flight table and the statistics, so a
/// `Cache` placed in a pipeline serves every request running through it.
/// Configure the store and key function before cloning.
pub struct Cache<I, O> {
    step: BoxStep<I, O>,
    store: Arc<dyn CacheStore<O>>,
    key_fn: KeyFn<I>,
    in_flight: Arc<InFlight<O>>,
    stats: Arc<CacheStats>,
}

impl<I, O> Cache<I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Wraps `step`, keying entries by the input's JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns a `BadRequest` error if `config` has a zero bound.
    pub fn new<S>(step: S, config: CacheConfig) -> Result<Self, StepError>
    where
        S: Step<I, O> + 'static,
        I: Serialize,
    {
        Self::keyed(step, config, |input: &I| CacheKey::from_input(input))
    }

    /// Wraps `step` with a custom key derivation.
    ///
    /// # Errors
    ///
    /// Returns a `BadRequest` error if `config` has a zero bound.
    pub fn keyed<S, K>(step: S, config: CacheConfig, key_fn: K) -> Result<Self, StepError>
    where
        S: Step<I, O> + 'static,
        K: Fn(&I) -> Result<CacheKey, CacheStoreError> + Send + Sync + 'static,
    {
        config.validate()?;

        Ok(Self {
            step: Arc::new(step),
            store: Arc::new(MemoryStore::new(&config)),
            key_fn: Arc::new(key_fn),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(CacheStats::default()),
        })
    }

    /// Replaces the key derivation with an infallible one.
    #[must_use]
    pub fn with_key_fn<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&I) -> CacheKey + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(move |input: &I| Ok(key_fn(input)));
        self
    }

    /// Replaces the backing store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CacheStore<O>>) -> Self {
        self.store = store;
        self
    }

    /// Returns the current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Removes every stored entry. In-flight invocations are unaffected.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Removes the entry for `input`, returning whether one was stored.
    pub fn invalidate(&self, input: &I) -> Result<bool, CacheStoreError> {
        let key = (self.key_fn)(input)?;
        self.store.remove(&key)
    }

    /// Periodically drops expired entries.
    ///
    /// The task holds only a weak reference to the store and exits once every
    /// clone of this cache has been dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(&self.store);
        let interval = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    tracing::debug!("Cache dropped, stopping sweeper");
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Swept expired cache entries");
                }
            }
        })
    }

    fn lookup(&self, key: &CacheKey) -> Lookup<O> {
        let mut in_flight = self.in_flight.lock();

        match self.store.get(key) {
            Ok(Some(value)) => return Lookup::Hit(value),
            Ok(None) => {}
            Err(error) => return Lookup::StoreFailed(error),
        }

        if let Some(leader) = in_flight.get(key) {
            return Lookup::Wait(leader.subscribe());
        }

        let (leader, _) = watch::channel(None);
        in_flight.insert(key.clone(), leader);
        Lookup::Lead
    }

    async fn bypass(&self, input: I, ctx: &Context, error: &CacheStoreError) -> Result<O, StepError> {
        self.stats.record_store_error();
        tracing::warn!(
            step = self.step.name(),
            error = %error,
            "Cache store failed, invoking step directly"
        );
        ctx.emit(
            "cache.store_error",
            Some(serde_json::json!({
                "step": self.step.name(),
                "error": error.to_string(),
            })),
        );
        self.step.run(input, ctx).await
    }

    fn emit(&self, ctx: &Context, event_type: &str, key: &CacheKey) {
        ctx.emit(
            event_type,
            Some(serde_json::json!({
                "step": self.step.name(),
                "key": key.as_str(),
            })),
        );
    }
}

impl<I, O> Clone for Cache<I, O> {
    fn clone(&self) -> Self {
        Self {
            step: Arc::clone(&self.step),
            store: Arc::clone(&self.store),
            key_fn: Arc::clone(&self.key_fn),
            in_flight: Arc::clone(&self.in_flight),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<I, O> fmt::Debug for Cache<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("step", &self.step.name())
            .field("entries", &self.store.len())
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, O> Step<I, O> for Cache<I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "cache"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError> {
        let key = match (self.key_fn)(&input) {
            Ok(key) => key,
            Err(error) => return self.bypass(input, ctx, &error).await,
        };

        loop {
            match self.lookup(&key) {
                Lookup::Hit(value) => {
                    self.stats.record_hit();
                    tracing::debug!(step = self.step.name(), key = %key, "Cache hit");
                    self.emit(ctx, "cache.hit", &key);
                    return Ok(value);
                }
                Lookup::StoreFailed(error) => return self.bypass(input, ctx, &error).await,
                Lookup::Wait(mut receiver) => {
                    self.stats.record_coalesced();
                    tracing::debug!(step = self.step.name(), key = %key, "Joining in-flight call");
                    self.emit(ctx, "cache.coalesced", &key);

                    let outcome = receiver
                        .wait_for(Option::is_some)
                        .await
                        .map(|outcome| (*outcome).clone());

                    match outcome {
                        Ok(Some(result)) => return result,
                        // The leader was dropped before settling.
                        Ok(None) | Err(_) => {
                            tracing::debug!(key = %key, "In-flight call abandoned, retrying");
                        }
                    }
                }
                Lookup::Lead => {
                    self.stats.record_miss();
                    tracing::debug!(step = self.step.name(), key = %key, "Cache miss");
                    self.emit(ctx, "cache.miss", &key);

                    let flight = Flight {
                        cache: self,
                        key,
                        settled: false,
                    };
                    let result = self.step.run(input, ctx).await;
                    flight.settle(ctx, &result);
                    return result;
                }
            }
        }
    }
}

/// Leadership of one in-flight key.
///
/// Dropping an unsettled flight releases the key so waiters retry.
struct Flight<'a, I, O> {
    cache: &'a Cache<I, O>,
    key: CacheKey,
    settled: bool,
}

impl<I, O> Flight<'_, I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn settle(mut self, ctx: &Context, result: &Result<O, StepError>) {
        let cache = self.cache;

        let (leader, stored) = {
            let mut in_flight = cache.in_flight.lock();
            let stored = match result {
                Ok(value) => Some(cache.store.insert(self.key.clone(), value.clone())),
                Err(_) => None,
            };
            (in_flight.remove(&self.key), stored)
        };
        self.settled = true;

        if let Some(leader) = leader {
            // Waiters run in their own contexts and report the failure there.
            leader.send_replace(Some(result.clone().map_err(StepError::unreported)));
        }

        match stored {
            Some(Ok(evicted)) if !evicted.is_empty() => {
                cache.stats.record_evictions(evicted.len());
                tracing::debug!(evicted = evicted.len(), "Evicted cache entries");
                ctx.emit(
                    "cache.evicted",
                    Some(serde_json::json!({
                        "step": cache.step.name(),
                        "count": evicted.len(),
                        "keys": evicted.iter().map(CacheKey::as_str).collect::<Vec<_>>(),
                    })),
                );
            }
            Some(Err(error)) => {
                cache.stats.record_store_error();
                tracing::warn!(key = %self.key, error = %error, "Failed to store cache entry");
                ctx.emit(
                    "cache.store_error",
                    Some(serde_json::json!({
                        "step": cache.step.name(),
                        "key": self.key.as_str(),
                        "error": error.to_string(),
                    })),
                );
            }
            _ => {}
        }
    }
}

impl<I, O> Drop for Flight<'_, I, O> {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.in_flight.lock().remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::steps::StepExt;
    use crate::testing::CountingStep;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    fn doubling() -> CountingStep<impl Fn(u32) -> Result<u32, StepError> + Send + Sync, u32, u32> {
        CountingStep::new(|x: u32| Ok(x * 2))
    }

    #[tokio::test]
    async fn test_hit_avoids_reinvocation() {
        let counting = doubling();
        let calls = counting.counter();
        let cache = counting.cached(CacheConfig::new().with_max_age(Duration::from_secs(60))).unwrap();
        let ctx = Context::detached();

        assert_eq!(cache.run(21, &ctx).await.unwrap(), 42);
        assert_eq!(cache.run(21, &ctx).await.unwrap(), 42);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let counting = doubling().with_delay(Duration::from_millis(30));
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new()).unwrap();
        let ctx = Context::detached();

        let (a, b) = tokio::join!(cache.run(5, &ctx), cache.run(5, &ctx));

        assert_eq!(a.unwrap(), 10);
        assert_eq!(b.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().coalesced, 1);
    }

    #[tokio::test]
    async fn test_single_flight_across_tasks() {
        let counting = doubling().with_delay(Duration::from_millis(30));
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.run(7, &Context::detached()).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 14);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let counting = CountingStep::new(|_: u32| Err::<u32, _>(StepError::upstream("pokeapi down")));
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new()).unwrap();
        let ctx = Context::detached();

        assert!(cache.run(1, &ctx).await.is_err());
        assert!(cache.run(1, &ctx).await.is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_shared_with_waiters() {
        let counting = CountingStep::new(|_: u32| Err::<u32, _>(StepError::not_found("missing")))
            .with_delay(Duration::from_millis(20));
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new()).unwrap();
        let ctx = Context::detached();

        let (a, b) = tokio::join!(cache.run(1, &ctx), cache.run(1, &ctx));

        assert_eq!(a.unwrap_err().message(), "missing");
        assert_eq!(b.unwrap_err().status_code(), 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_size_one_evicts_previous_key() {
        let counting = doubling();
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new().with_max_size(1)).unwrap();
        let ctx = Context::detached();

        cache.run(1, &ctx).await.unwrap();
        cache.run(2, &ctx).await.unwrap();
        cache.run(1, &ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[tokio::test]
    async fn test_age_expiry() {
        let counting = doubling();
        let calls = counting.counter();
        let cache = Cache::new(
            counting,
            CacheConfig::new().with_max_age(Duration::from_millis(30)),
        )
        .unwrap();
        let ctx = Context::detached();

        cache.run(1, &ctx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.run(1, &ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_leader_releases_key() {
        let counting = doubling().with_delay(Duration::from_millis(50));
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new()).unwrap();
        let ctx = Context::detached();

        let (abandoned, waiter) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(10), cache.run(3, &ctx)),
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                cache.run(3, &ctx).await
            }
        );

        assert!(abandoned.is_err());
        assert_eq!(waiter.unwrap(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.run(3, &ctx).await.unwrap(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct BrokenStore;

    impl CacheStore<u32> for BrokenStore {
        fn get(&self, _key: &CacheKey) -> Result<Option<u32>, CacheStoreError> {
            Err(CacheStoreError::Corrupted("bad page".to_string()))
        }

        fn insert(&self, _key: CacheKey, _value: u32) -> Result<Vec<CacheKey>, CacheStoreError> {
            Err(CacheStoreError::Unavailable("read only".to_string()))
        }

        fn remove(&self, _key: &CacheKey) -> Result<bool, CacheStoreError> {
            Ok(false)
        }

        fn len(&self) -> usize {
            0
        }

        fn purge_expired(&self) -> usize {
            0
        }

        fn clear(&self) {}
    }

    #[tokio::test]
    async fn test_store_failure_bypasses_cache() {
        let counting = doubling();
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new())
            .unwrap()
            .with_store(Arc::new(BrokenStore));

        let sink = Arc::new(CollectingEventSink::new());
        let ctx = Context::builder().event_sink(sink.clone()).build();

        assert_eq!(cache.run(4, &ctx).await.unwrap(), 8);
        assert_eq!(cache.run(4, &ctx).await.unwrap(), 8);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().store_errors, 2);
        assert_eq!(sink.count("cache.store_error"), 2);
        assert_eq!(sink.count("cache.hit"), 0);
    }

    #[tokio::test]
    async fn test_nan_input_bypasses_cache() {
        let counting = CountingStep::new(|weight: Option<f64>| Ok(weight.is_some()));
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new()).unwrap();
        let ctx = Context::detached();

        assert!(!cache.run(None, &ctx).await.unwrap());
        assert!(cache.run(Some(f64::NAN), &ctx).await.unwrap());
        assert!(!cache.run(None, &ctx).await.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().store_errors, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_events() {
        let cache = Cache::new(doubling(), CacheConfig::new().with_max_size(1)).unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = Context::builder().event_sink(sink.clone()).build();

        cache.run(1, &ctx).await.unwrap();
        cache.run(1, &ctx).await.unwrap();
        cache.run(2, &ctx).await.unwrap();

        assert_eq!(sink.count("cache.miss"), 2);
        assert_eq!(sink.count("cache.hit"), 1);
        assert_eq!(sink.count("cache.evicted"), 1);

        let hit = &sink.events_of_type("cache.hit")[0];
        let payload = hit.1.as_ref().unwrap();
        assert_eq!(payload["key"], CacheKey::from_input(&1_u32).unwrap().as_str());
    }

    #[tokio::test]
    async fn test_custom_key_fn() {
        let counting = CountingStep::new(|pair: (u32, String)| Ok(pair.0));
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new())
            .unwrap()
            .with_key_fn(|pair: &(u32, String)| CacheKey::new(pair.0.to_string()));
        let ctx = Context::detached();

        cache.run((1, "first".to_string()), &ctx).await.unwrap();
        cache.run((1, "second".to_string()), &ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let counting = doubling();
        let calls = counting.counter();
        let cache = Cache::new(counting, CacheConfig::new()).unwrap();
        let ctx = Context::detached();

        cache.run(1, &ctx).await.unwrap();
        cache.run(2, &ctx).await.unwrap();
        assert!(cache.invalidate(&1).unwrap());
        cache.run(1, &ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_entries() {
        let cache = Cache::new(
            doubling(),
            CacheConfig::new().with_max_age(Duration::from_millis(20)),
        )
        .unwrap();
        let sweeper = cache.spawn_sweeper(Duration::from_millis(10));

        cache.run(1, &Context::detached()).await.unwrap();
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.len(), 0);

        drop(cache);
        tokio::time::timeout(Duration::from_millis(200), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = Cache::new(doubling(), CacheConfig::new().with_max_size(0)).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
