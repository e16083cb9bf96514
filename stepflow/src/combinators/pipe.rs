//! Sequential composition.

use crate::context::Context;
use crate::errors::StepError;
use crate::steps::{map, tap, BoxStep, Step};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// One stage of a pipe, remembering its position for diagnostics.
struct Stage<S> {
    index: usize,
    inner: S,
}

#[async_trait]
impl<S, I, O> Step<I, O> for Stage<S>
where
    S: Step<I, O>,
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError> {
        match self.inner.run(input, ctx).await {
            Ok(output) => Ok(output),
            Err(error) if error.is_reported() => {
                tracing::debug!(stage = self.index, step = self.inner.name(), "Pipe stage propagated a failure");
                Err(error)
            }
            Err(error) => {
                tracing::warn!(
                    stage = self.index,
                    step = self.inner.name(),
                    kind = %error.kind(),
                    error = %error,
                    "Pipe stage failed"
                );
                ctx.emit(
                    "pipe.stage_failed",
                    Some(serde_json::json!({
                        "stage": self.index,
                        "step": self.inner.name(),
                        "kind": error.kind().as_str(),
                        "error": error.to_string(),
                    })),
                );
                Err(error.mark_reported())
            }
        }
    }
}

/// Everything before the last stage, followed by the last stage.
struct Then<I, M, N> {
    head: BoxStep<I, M>,
    last: Stage<N>,
}

#[async_trait]
impl<I, M, P, N> Step<I, P> for Then<I, M, N>
where
    N: Step<M, P>,
    I: Send + 'static,
    M: Send + 'static,
    P: Send + 'static,
{
    async fn run(&self, input: I, ctx: &Context) -> Result<P, StepError> {
        let intermediate = self.head.run(input, ctx).await?;
        self.last.run(intermediate, ctx).await
    }
}

/// Runs stages strictly in order, feeding each stage the previous output.
///
/// The first failure stops the pipe: later stages are never invoked and the
/// failure is returned unchanged. A pipe is itself a [`Step`], so it nests
/// inside other combinators.
///
/// ```
/// use stepflow::prelude::*;
///
/// let pipeline = Pipe::new(map(|x: u32| x + 1))
///     .then(map(|x: u32| x * 2))
///     .then(step(|x: u32, _ctx: &Context| Ok(x.to_string())));
///
/// assert_eq!(pipeline.len(), 3);
/// ```
pub struct Pipe<I, O> {
    head: BoxStep<I, O>,
    len: usize,
}

impl<I, O> Pipe<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a pipe with a single stage.
    pub fn new<S>(first: S) -> Self
    where
        S: Step<I, O> + 'static,
    {
        Self {
            head: Arc::new(Stage {
                index: 1,
                inner: first,
            }),
            len: 1,
        }
    }

    /// Appends a stage that consumes this pipe's output.
    #[must_use]
    pub fn then<P, N>(self, next: N) -> Pipe<I, P>
    where
        N: Step<O, P> + 'static,
        P: Send + 'static,
    {
        let index = self.len + 1;
        Pipe {
            head: Arc::new(Then {
                head: self.head,
                last: Stage { index, inner: next },
            }),
            len: index,
        }
    }

    /// Appends an infallible transformation.
    #[must_use]
    pub fn map<P, F>(self, f: F) -> Pipe<I, P>
    where
        F: Fn(O) -> P + Send + Sync + 'static,
        P: Send + 'static,
    {
        self.then(map(f))
    }

    /// Appends a side effect that passes the output through.
    #[must_use]
    pub fn tap<F>(self, f: F) -> Self
    where
        F: Fn(&O, &Context) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.then(tap(f))
    }

    /// Returns the number of stages.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false: a pipe has at least one stage.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

impl<I, O> Clone for Pipe<I, O> {
    fn clone(&self) -> Self {
        Self {
            head: Arc::clone(&self.head),
            len: self.len,
        }
    }
}

impl<I, O> fmt::Debug for Pipe<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe").field("len", &self.len).finish()
    }
}

#[async_trait]
impl<I, O> Step<I, O> for Pipe<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "pipe"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError> {
        self.head
            .run(input, ctx)
            .instrument(ctx.log().clone())
            .await
    }
}

/// Builds a [`Pipe`] from a list of stages.
///
/// `pipe![a, b, c]` is shorthand for `Pipe::new(a).then(b).then(c)`.
#[macro_export]
macro_rules! pipe {
    ($first:expr $(, $rest:expr)* $(,)?) => {
        $crate::combinators::Pipe::new($first)$(.then($rest))*
    };
}
