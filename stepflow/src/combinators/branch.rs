//! Conditional routing.

use crate::context::Context;
use crate::errors::StepError;
use crate::steps::{BoxStep, Step};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

type Predicate<I> = Arc<dyn Fn(&I, &Context) -> bool + Send + Sync>;

/// Runs exactly one of two steps depending on a predicate.
pub struct Branch<I, O> {
    predicate: Predicate<I>,
    when_true: BoxStep<I, O>,
    when_false: BoxStep<I, O>,
}

impl<I, O> Branch<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a branch.
    pub fn new<P, T, E>(predicate: P, when_true: T, when_false: E) -> Self
    where
        P: Fn(&I, &Context) -> bool + Send + Sync + 'static,
        T: Step<I, O> + 'static,
        E: Step<I, O> + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            when_true: Arc::new(when_true),
            when_false: Arc::new(when_false),
        }
    }
}

impl<I, O> Clone for Branch<I, O> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
            when_true: Arc::clone(&self.when_true),
            when_false: Arc::clone(&self.when_false),
        }
    }
}

impl<I, O> fmt::Debug for Branch<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("when_true", &self.when_true.name())
            .field("when_false", &self.when_false.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, O> Step<I, O> for Branch<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "branch"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<O, StepError> {
        let chosen = if (self.predicate)(&input, ctx) {
            &self.when_true
        } else {
            &self.when_false
        };
        tracing::debug!(step = chosen.name(), "Branch selected");
        chosen.run(input, ctx).await
    }
}
