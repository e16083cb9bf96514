//! A named operation and its bound pipeline.

use crate::combinators::Pipe;
use crate::context::Context;
use crate::errors::StepError;
use crate::steps::{step, BoxStep, Step};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// The pipeline type every operation is normalized to.
pub type OperationPipeline = BoxStep<serde_json::Value, serde_json::Value>;

/// One API operation, e.g. `getPokemons`.
pub struct Operation {
    name: String,
    pipeline: Option<OperationPipeline>,
}

impl Operation {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipeline: None,
        }
    }

    /// Binds the pipeline that answers this operation.
    ///
    /// The pipeline receives `null` as its initial input and reads the
    /// request through the context. Its output is serialized as the response
    /// body. Binding again replaces the previous pipeline.
    pub fn setup<S, O>(&mut self, pipeline: S) -> &mut Self
    where
        S: Step<serde_json::Value, O> + 'static,
        O: Serialize + Send + 'static,
    {
        let serialize = step(|output: O, _ctx: &Context| {
            serde_json::to_value(output).map_err(|e| {
                StepError::internal("failed to serialize the operation result").with_source(e)
            })
        });

        self.pipeline = Some(Arc::new(Pipe::new(pipeline).then(serialize)));
        tracing::debug!(operation = %self.name, "Pipeline bound");
        self
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once a pipeline has been bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.pipeline.is_some()
    }

    pub(crate) fn pipeline(&self) -> Option<&OperationPipeline> {
        self.pipeline.as_ref()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// The transport-neutral answer to one operation invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResponse {
    /// Response status code.
    pub status: u16,
    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: serde_json::Value,
}

impl OperationResponse {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// A pass-through step that overrides the response status.
///
/// ```
/// use stepflow::prelude::*;
///
/// let save_nickname = Pipe::new(map(|body: serde_json::Value| body))
///     .then(set_status(204));
/// # let _ = save_nickname;
/// ```
pub struct SetStatus<I> {
    status: u16,
    _marker: PhantomData<fn(I) -> I>,
}

/// Creates a [`SetStatus`] step.
pub const fn set_status<I>(status: u16) -> SetStatus<I> {
    SetStatus {
        status,
        _marker: PhantomData,
    }
}

impl<I> fmt::Debug for SetStatus<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetStatus").field("status", &self.status).finish()
    }
}

#[async_trait]
impl<I: Send + 'static> Step<I, I> for SetStatus<I> {
    fn name(&self) -> &str {
        "set_status"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<I, StepError> {
        ctx.response().set_status(self.status);
        Ok(input)
    }
}

/// A pass-through step that sets a response header.
pub struct SetHeader<I> {
    name: String,
    value: String,
    _marker: PhantomData<fn(I) -> I>,
}

/// Creates a [`SetHeader`] step.
pub fn set_header<I>(name: impl Into<String>, value: impl Into<String>) -> SetHeader<I> {
    SetHeader {
        name: name.into(),
        value: value.into(),
        _marker: PhantomData,
    }
}

impl<I> fmt::Debug for SetHeader<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetHeader")
            .field("name", &self.name)
            .field("value", &self.value)
            .finish()
    }
}

#[async_trait]
impl<I: Send + 'static> Step<I, I> for SetHeader<I> {
    fn name(&self) -> &str {
        "set_header"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<I, StepError> {
        ctx.response().set_header(&self.name, self.value.clone());
        Ok(input)
    }
}
