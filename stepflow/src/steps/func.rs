//! Function-backed steps.

use super::Step;
use crate::context::Context;
use crate::errors::StepError;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;

/// A step backed by a synchronous, fallible function.
pub struct FnStep<F, I, O> {
    func: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<F, I, O> FnStep<F, I, O>
where
    F: Fn(I, &Context) -> Result<O, StepError> + Send + Sync,
{
    /// Creates a new function-based step.
    pub const fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

impl<F, I, O> Debug for FnStep<F, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, I, O> Step<I, O> for FnStep<F, I, O>
where
    F: Fn(I, &Context) -> Result<O, StepError> + Send + Sync,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError> {
        (self.func)(input, ctx)
    }
}

/// A step backed by an async function.
///
/// The function receives an owned [`Context`] handle so the returned future
/// can be `'static`.
pub struct AsyncFnStep<F, I, O> {
    func: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<F, I, O> AsyncFnStep<F, I, O> {
    /// Creates a new async function-based step.
    pub const fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

impl<F, I, O> Debug for AsyncFnStep<F, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFnStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, I, O> Step<I, O> for AsyncFnStep<F, I, O>
where
    F: Fn(I, Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, StepError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError> {
        (self.func)(input, ctx.clone()).await
    }
}

/// A step backed by an infallible transformation.
pub struct MapStep<F, I, O> {
    func: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<F, I, O> Debug for MapStep<F, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, I, O> Step<I, O> for MapStep<F, I, O>
where
    F: Fn(I) -> O + Send + Sync,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(&self, input: I, _ctx: &Context) -> Result<O, StepError> {
        Ok((self.func)(input))
    }
}

/// Runs a side effect and forwards its input unchanged.
///
/// The function's failure propagates like any step failure; its success
/// value is discarded.
pub struct Tap<F, I> {
    func: F,
    _marker: PhantomData<fn(I) -> I>,
}

impl<F, I> Debug for Tap<F, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tap").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, I> Step<I, I> for Tap<F, I>
where
    F: Fn(&I, &Context) -> Result<(), StepError> + Send + Sync,
    I: Send + 'static,
{
    fn name(&self) -> &str {
        "tap"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<I, StepError> {
        (self.func)(&input, ctx)?;
        Ok(input)
    }
}

/// Attaches a name to a step.
#[derive(Debug, Clone)]
pub struct Named<S> {
    name: String,
    inner: S,
}

impl<S> Named<S> {
    /// Wraps `inner` under `name`.
    pub fn new(name: impl Into<String>, inner: S) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

#[async_trait]
impl<S, I, O> Step<I, O> for Named<S>
where
    S: Step<I, O>,
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError> {
        self.inner.run(input, ctx).await
    }
}

/// Creates a step from a synchronous function.
pub const fn step<F, I, O>(func: F) -> FnStep<F, I, O>
where
    F: Fn(I, &Context) -> Result<O, StepError> + Send + Sync,
{
    FnStep::new(func)
}

/// Creates a step from an async function.
pub const fn step_async<F, Fut, I, O>(func: F) -> AsyncFnStep<F, I, O>
where
    F: Fn(I, Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, StepError>> + Send + 'static,
{
    AsyncFnStep::new(func)
}

/// Creates a step from an infallible transformation.
pub const fn map<F, I, O>(func: F) -> MapStep<F, I, O>
where
    F: Fn(I) -> O + Send + Sync,
{
    MapStep {
        func,
        _marker: PhantomData,
    }
}

/// Creates a pass-through side-effect step.
pub const fn tap<F, I>(func: F) -> Tap<F, I>
where
    F: Fn(&I, &Context) -> Result<(), StepError> + Send + Sync,
{
    Tap {
        func,
        _marker: PhantomData,
    }
}
