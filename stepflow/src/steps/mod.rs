//! The step trait and leaf step implementations.
//!
//! Steps are the fundamental units of work in a stepflow pipeline. A step
//! consumes an input and the request [`Context`] and produces an output or a
//! [`StepError`]. Combinators are steps too, so they nest freely.

mod func;

pub use func::{step, step_async, tap, map, AsyncFnStep, FnStep, MapStep, Named, Tap};

use crate::cache::{Cache, CacheConfig};
use crate::combinators::Pipe;
use crate::context::Context;
use crate::errors::StepError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// A shareable, type-erased step.
pub type BoxStep<I, O> = Arc<dyn Step<I, O>>;

/// Trait for pipeline steps.
///
/// Steps are stateless by contract: a pipeline is built once and run
/// concurrently for many requests, so per-request state belongs in the
/// [`Context`] or in the values flowing between steps.
///
/// Implementations bound `I` and `O` by `Send + 'static`.
#[async_trait]
pub trait Step<I, O>: Send + Sync {
    /// Returns a short name used in logs and events.
    fn name(&self) -> &str {
        "step"
    }

    /// Runs the step.
    ///
    /// # Arguments
    ///
    /// * `input` - The previous stage's output
    /// * `ctx` - The request context
    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError>;
}

#[async_trait]
impl<I, O, S> Step<I, O> for Arc<S>
where
    S: Step<I, O> + ?Sized,
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError> {
        (**self).run(input, ctx).await
    }
}

/// Fluent composition helpers available on every step.
pub trait StepExt<I, O>: Step<I, O> + Sized + 'static
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Runs `next` on this step's output.
    fn then<P, N>(self, next: N) -> Pipe<I, P>
    where
        N: Step<O, P> + 'static,
        P: Send + 'static,
    {
        Pipe::new(self).then(next)
    }

    /// Runs a side effect on this step's output and passes it through.
    fn tap<F>(self, f: F) -> Pipe<I, O>
    where
        F: Fn(&O, &Context) -> Result<(), StepError> + Send + Sync + 'static,
    {
        Pipe::new(self).then(tap(f))
    }

    /// Transforms this step's output with an infallible function.
    fn map<P, F>(self, f: F) -> Pipe<I, P>
    where
        F: Fn(O) -> P + Send + Sync + 'static,
        P: Send + 'static,
    {
        Pipe::new(self).then(map(f))
    }

    /// Memoizes this step by input.
    ///
    /// # Errors
    ///
    /// Returns a `BadRequest` error if the configuration is invalid.
    fn cached(self, config: CacheConfig) -> Result<Cache<I, O>, StepError>
    where
        I: Serialize,
        O: Clone + Sync,
    {
        Cache::new(self, config)
    }

    /// Gives this step a name for logs and events.
    fn named(self, name: impl Into<String>) -> Named<Self> {
        Named::new(name, self)
    }

    /// Erases the concrete type.
    fn boxed(self) -> BoxStep<I, O> {
        Arc::new(self)
    }
}

impl<I, O, S> StepExt<I, O> for S
where
    S: Step<I, O> + Sized + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
}
