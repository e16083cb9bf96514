//! Concurrent application of one step across a sequence.

use super::parallel::settle;
use crate::context::Context;
use crate::errors::StepError;
use crate::steps::{BoxStep, Step};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Ceiling on simultaneous invocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// Start every element at once.
    #[default]
    Unbounded,
    /// Run at most this many elements at a time.
    Limited(NonZeroUsize),
}

impl Concurrency {
    /// Creates a ceiling of `limit`; zero means unbounded.
    #[must_use]
    pub fn limited(limit: usize) -> Self {
        NonZeroUsize::new(limit).map_or(Self::Unbounded, Self::Limited)
    }

    /// Returns the ceiling, if any.
    #[must_use]
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Limited(limit) => Some(limit.get()),
        }
    }
}

type Projection<I, T> = Arc<dyn Fn(I) -> Vec<T> + Send + Sync>;

/// Applies a step to every element of a projected sequence.
///
/// Results keep input order regardless of completion order. With a
/// [`Concurrency::Limited`] ceiling, elements acquire a fair semaphore in
/// input order; once any element fails no further element is started,
/// those already running are awaited, and the first failure in input order
/// is reported.
pub struct ParallelMap<I, T, O> {
    project: Projection<I, T>,
    step: BoxStep<T, O>,
    concurrency: Concurrency,
}

impl<I, T, O> ParallelMap<I, T, O>
where
    I: Send + 'static,
    T: Send + 'static,
    O: Send + 'static,
{
    /// Creates a parallel map with no concurrency ceiling.
    pub fn new<P, S>(project: P, step: S) -> Self
    where
        P: Fn(I) -> Vec<T> + Send + Sync + 'static,
        S: Step<T, O> + 'static,
    {
        Self {
            project: Arc::new(project),
            step: Arc::new(step),
            concurrency: Concurrency::Unbounded,
        }
    }

    /// Sets the concurrency ceiling.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Returns the concurrency ceiling.
    #[must_use]
    pub const fn concurrency(&self) -> Concurrency {
        self.concurrency
    }
}

impl<T, O> ParallelMap<Vec<T>, T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    /// Maps `step` over the input sequence itself.
    pub fn over<S>(step: S) -> Self
    where
        S: Step<T, O> + 'static,
    {
        Self::new(|items: Vec<T>| items, step)
    }
}

impl<I, T, O> Clone for ParallelMap<I, T, O> {
    fn clone(&self) -> Self {
        Self {
            project: Arc::clone(&self.project),
            step: Arc::clone(&self.step),
            concurrency: self.concurrency,
        }
    }
}

impl<I, T, O> fmt::Debug for ParallelMap<I, T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelMap")
            .field("step", &self.step.name())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, T, O> Step<I, Vec<O>> for ParallelMap<I, T, O>
where
    I: Send + 'static,
    T: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "parallel_map"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<Vec<O>, StepError> {
        let items = (self.project)(input);
        if items.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            elements = items.len(),
            limit = self.concurrency.limit(),
            step = self.step.name(),
            "Starting parallel map"
        );

        let results: Vec<Option<Result<O, StepError>>> = match self.concurrency {
            Concurrency::Unbounded => join_all(items.into_iter().map(|item| self.step.run(item, ctx)))
                .await
                .into_iter()
                .map(Some)
                .collect(),
            Concurrency::Limited(limit) => {
                let permits = Semaphore::new(limit.get());
                let failed = AtomicBool::new(false);
                let permits = &permits;
                let failed = &failed;

                join_all(items.into_iter().map(|item| async move {
                    let Ok(_permit) = permits.acquire().await else {
                        return None;
                    };
                    if failed.load(Ordering::Acquire) {
                        return None;
                    }
                    let result = self.step.run(item, ctx).await;
                    if result.is_err() {
                        failed.store(true, Ordering::Release);
                    }
                    Some(result)
                }))
                .await
            }
        };

        settle(ctx, "parallel_map.failed", results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{map, step_async};
    use crate::testing::CountingStep;
    use pretty_assertions::assert_eq;
    use rand::Rng;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_concurrency_limited_zero_is_unbounded() {
        assert_eq!(Concurrency::limited(0), Concurrency::Unbounded);
        assert_eq!(Concurrency::limited(3).limit(), Some(3));
        assert_eq!(Concurrency::default().limit(), None);
    }

    #[tokio::test]
    async fn test_preserves_input_order_with_random_latency() {
        let jittered = step_async(|x: u32, _ctx| async move {
            let millis = rand::thread_rng().gen_range(1..25);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, StepError>(x * 100)
        });

        let fan_out = ParallelMap::over(jittered);
        let output = fan_out
            .run(vec![1, 2, 3, 4, 5], &Context::detached())
            .await
            .unwrap();

        assert_eq!(output, vec![100, 200, 300, 400, 500]);
    }

    #[tokio::test]
    async fn test_projection() {
        let fan_out = ParallelMap::new(
            |body: serde_json::Value| {
                body["results"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
            },
            map(|entry: serde_json::Value| entry["name"].as_str().unwrap_or("").to_string()),
        );

        let body = serde_json::json!({"results": [{"name": "bulbasaur"}, {"name": "ivysaur"}]});
        let output = fan_out.run(body, &Context::detached()).await.unwrap();

        assert_eq!(output, vec!["bulbasaur", "ivysaur"]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let counting = CountingStep::new(|x: u32| Ok(x));
        let calls = counting.counter();
        let fan_out = ParallelMap::over(counting);

        assert!(fan_out.run(Vec::new(), &Context::detached()).await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_limit_bounds_simultaneous_invocations() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_c, peak_c) = (active.clone(), peak.clone());

        let tracked = step_async(move |x: u32, _ctx| {
            let active = active_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, StepError>(x)
            }
        });

        let fan_out = ParallelMap::over(tracked).with_concurrency(Concurrency::limited(2));
        let output = fan_out
            .run((0..8).collect(), &Context::detached())
            .await
            .unwrap();

        assert_eq!(output, (0..8).collect::<Vec<u32>>());
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unbounded_runs_all_at_once() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_c, peak_c) = (active.clone(), peak.clone());

        let tracked = step_async(move |x: u32, _ctx| {
            let active = active_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, StepError>(x)
            }
        });

        ParallelMap::over(tracked)
            .run((0..5).collect(), &Context::detached())
            .await
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_failure_stops_new_starts() {
        let counting = CountingStep::new(|x: u32| {
            if x == 1 {
                Err(StepError::not_found(format!("pokemon {x}")))
            } else {
                Ok(x)
            }
        })
        .with_delay(Duration::from_millis(5));
        let calls = counting.counter();

        let fan_out = ParallelMap::over(counting).with_concurrency(Concurrency::limited(1));
        let err = fan_out
            .run(vec![0, 1, 2, 3], &Context::detached())
            .await
            .unwrap_err();

        assert_eq!(err.message(), "pokemon 1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unbounded_failure_waits_for_all() {
        let counting = CountingStep::new(|x: u32| {
            if x % 2 == 1 {
                Err(StepError::upstream(format!("element {x}")))
            } else {
                Ok(x)
            }
        });
        let calls = counting.counter();

        let err = ParallelMap::over(counting)
            .run(vec![0, 1, 2, 3], &Context::detached())
            .await
            .unwrap_err();

        assert_eq!(err.message(), "element 1");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
