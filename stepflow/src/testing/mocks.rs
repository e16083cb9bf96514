//! Mock steps for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::errors::StepError;
use crate::steps::Step;

/// A step that counts invocations around a plain function.
///
/// The counters are shared handles, so they stay readable after the step has
/// been moved into a combinator.
pub struct CountingStep<F, I, O> {
    func: F,
    calls: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    delay: Option<Duration>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<F, I, O> CountingStep<F, I, O>
where
    F: Fn(I) -> Result<O, StepError> + Send + Sync,
{
    /// Creates a new counting step.
    #[must_use]
    pub fn new(func: F) -> Self {
        Self {
            func,
            calls: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            delay: None,
            _marker: PhantomData,
        }
    }

    /// Sleeps for `delay` before calling the function.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of invocations started so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns a handle to the started-invocations counter.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Returns a handle to the finished-invocations counter.
    #[must_use]
    pub fn completed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.completed)
    }
}

#[async_trait]
impl<F, I, O> Step<I, O> for CountingStep<F, I, O>
where
    F: Fn(I) -> Result<O, StepError> + Send + Sync,
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self, input: I, _ctx: &Context) -> Result<O, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.func)(input);
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// A step that always fails with the same error.
pub struct FailingStep<O> {
    error: StepError,
    calls: AtomicUsize,
    _marker: PhantomData<fn() -> O>,
}

impl<O> FailingStep<O> {
    /// Creates a new failing step.
    #[must_use]
    pub const fn new(error: StepError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Returns the number of times the step was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<I, O> Step<I, O> for FailingStep<O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, _input: I, _ctx: &Context) -> Result<O, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Shared, ordered log of step invocations.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label.
    pub fn record(&self, label: impl Into<String>) {
        self.calls.lock().push(label.into());
    }

    /// Returns the labels in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Clears the journal.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// A pass-through step that writes its label to a [`CallJournal`].
#[derive(Debug, Clone)]
pub struct RecordingStep {
    label: String,
    journal: CallJournal,
}

impl RecordingStep {
    /// Creates a new recording step.
    #[must_use]
    pub fn new(label: impl Into<String>, journal: CallJournal) -> Self {
        Self {
            label: label.into(),
            journal,
        }
    }
}

#[async_trait]
impl<I> Step<I, I> for RecordingStep
where
    I: Send + 'static,
{
    fn name(&self) -> &str {
        &self.label
    }

    async fn run(&self, input: I, _ctx: &Context) -> Result<I, StepError> {
        self.journal.record(self.label.clone());
        Ok(input)
    }
}

/// A pass-through step that takes time to execute.
#[derive(Debug, Clone, Copy)]
pub struct DelayStep {
    delay: Duration,
}

impl DelayStep {
    /// Creates a new delay step.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Creates a delay step with the delay in milliseconds.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }
}

#[async_trait]
impl<I> Step<I, I> for DelayStep
where
    I: Send + 'static,
{
    fn name(&self) -> &str {
        "delay"
    }

    async fn run(&self, input: I, _ctx: &Context) -> Result<I, StepError> {
        tokio::time::sleep(self.delay).await;
        Ok(input)
    }
}
