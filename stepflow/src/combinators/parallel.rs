//! Fixed fan-out over a shared input.

use crate::context::Context;
use crate::errors::StepError;
use crate::steps::{BoxStep, Step};
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;

/// Collects fanned-out results once every branch has settled.
///
/// `None` marks a branch that was never started. The first failure in
/// declaration order wins; later failures are only counted.
pub(crate) fn settle<O>(
    ctx: &Context,
    event_type: &str,
    results: impl IntoIterator<Item = Option<Result<O, StepError>>>,
) -> Result<Vec<O>, StepError> {
    let mut outputs = Vec::new();
    let mut first_failure: Option<(usize, StepError)> = None;
    let mut failures = 0_usize;
    let mut skipped = 0_usize;
    let mut total = 0_usize;

    for (index, result) in results.into_iter().enumerate() {
        total += 1;
        match result {
            Some(Ok(output)) => outputs.push(output),
            Some(Err(error)) => {
                failures += 1;
                if first_failure.is_none() {
                    first_failure = Some((index, error));
                }
            }
            None => skipped += 1,
        }
    }

    let Some((index, error)) = first_failure else {
        return Ok(outputs);
    };

    tracing::warn!(
        index,
        failures,
        skipped,
        total,
        error = %error,
        "Fan-out failed"
    );
    ctx.emit(
        event_type,
        Some(serde_json::json!({
            "index": index,
            "failures": failures,
            "skipped": skipped,
            "total": total,
            "kind": error.kind().as_str(),
            "error": error.to_string(),
        })),
    );

    Err(error)
}

/// Runs several steps concurrently against the same input.
///
/// Results are returned in declaration order, not completion order. When a
/// branch fails the combinator still waits for every sibling before it
/// reports the first failure in declaration order.
pub struct Parallel<I, O> {
    branches: Vec<BoxStep<I, O>>,
}

impl<I, O> Parallel<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    /// Creates a parallel step with no branches.
    #[must_use]
    pub fn new() -> Self {
        Self {
            branches: Vec::new(),
        }
    }

    /// Creates a parallel step from already boxed branches.
    #[must_use]
    pub fn from_steps(branches: Vec<BoxStep<I, O>>) -> Self {
        Self { branches }
    }

    /// Adds a branch.
    #[must_use]
    pub fn with_step<S>(mut self, step: S) -> Self
    where
        S: Step<I, O> + 'static,
    {
        self.branches.push(Arc::new(step));
        self
    }

    /// Returns the number of branches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Returns true if there are no branches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

impl<I, O> Default for Parallel<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Clone for Parallel<I, O> {
    fn clone(&self) -> Self {
        Self {
            branches: self.branches.clone(),
        }
    }
}

impl<I, O> fmt::Debug for Parallel<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parallel")
            .field(
                "branches",
                &self.branches.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait]
impl<I, O> Step<I, Vec<O>> for Parallel<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "parallel"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<Vec<O>, StepError> {
        let pending: Vec<_> = self
            .branches
            .iter()
            .map(|branch| branch.run(input.clone(), ctx))
            .collect();
        drop(input);

        let results = join_all(pending).await;
        settle(ctx, "parallel.failed", results.into_iter().map(Some))
    }
}

/// Runs two steps with different output types concurrently.
///
/// Same wait-for-both policy as [`Parallel`]: if either side fails, the
/// other is still awaited, and the left failure wins when both fail.
pub struct Join<I, A, B> {
    left: BoxStep<I, A>,
    right: BoxStep<I, B>,
}

impl<I, A, B> Join<I, A, B>
where
    I: Clone + Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    /// Creates a join of two steps.
    pub fn new<L, R>(left: L, right: R) -> Self
    where
        L: Step<I, A> + 'static,
        R: Step<I, B> + 'static,
    {
        Self {
            left: Arc::new(left),
            right: Arc::new(right),
        }
    }
}

impl<I, A, B> Clone for Join<I, A, B> {
    fn clone(&self) -> Self {
        Self {
            left: Arc::clone(&self.left),
            right: Arc::clone(&self.right),
        }
    }
}

impl<I, A, B> fmt::Debug for Join<I, A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join")
            .field("left", &self.left.name())
            .field("right", &self.right.name())
            .finish()
    }
}

#[async_trait]
impl<I, A, B> Step<I, (A, B)> for Join<I, A, B>
where
    I: Clone + Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    fn name(&self) -> &str {
        "join"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<(A, B), StepError> {
        let (left, right) = futures::join!(
            self.left.run(input.clone(), ctx),
            self.right.run(input, ctx)
        );

        match (left, right) {
            (Ok(a), Ok(b)) => Ok((a, b)),
            (Err(error), other) => {
                let failures = if other.is_err() { 2 } else { 1 };
                Err(report_join_failure(ctx, 0, failures, error))
            }
            (Ok(_), Err(error)) => Err(report_join_failure(ctx, 1, 1, error)),
        }
    }
}

fn report_join_failure(ctx: &Context, index: usize, failures: usize, error: StepError) -> StepError {
    tracing::warn!(index, failures, error = %error, "Join failed");
    ctx.emit(
        "parallel.failed",
        Some(serde_json::json!({
            "index": index,
            "failures": failures,
            "skipped": 0,
            "total": 2,
            "kind": error.kind().as_str(),
            "error": error.to_string(),
        })),
    );
    error
}

/// Builds a [`Parallel`] from a list of steps with the same output type.
#[macro_export]
macro_rules! parallel {
    ($($branch:expr),* $(,)?) => {
        $crate::combinators::Parallel::new()$(.with_step($branch))*
    };
}
