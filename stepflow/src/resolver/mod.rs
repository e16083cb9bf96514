//! Binding pipelines to named operations.
//!
//! A [`Resolver`] owns one [`Operation`] per API operation. Each request is
//! handled in a fresh [`Context`]; the bound pipeline's output becomes the
//! response body and any failure becomes an error body with the status of
//! its [`ErrorKind`](crate::errors::ErrorKind).

mod operation;

pub use operation::{
    set_header, set_status, Operation, OperationPipeline, OperationResponse, SetHeader, SetStatus,
};

use crate::context::{Context, InboundRequest, RequestIdentity, SharedResources};
use crate::errors::StepError;
use crate::events::{EventSink, NoOpEventSink};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Routes operation names to their pipelines.
pub struct Resolver {
    shared: Arc<SharedResources>,
    operations: BTreeMap<String, Operation>,
    event_sink: Arc<dyn EventSink>,
    default_headers: HashMap<String, String>,
}

impl Resolver {
    /// Creates a resolver whose contexts share `shared`.
    #[must_use]
    pub fn new(shared: Arc<SharedResources>) -> Self {
        Self {
            shared,
            operations: BTreeMap::new(),
            event_sink: Arc::new(NoOpEventSink),
            default_headers: HashMap::new(),
        }
    }

    /// Sets the sink every request context emits to.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Adds a header sent with every response.
    ///
    /// Headers set by a step take precedence.
    #[must_use]
    pub fn with_default_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.default_headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns the operation called `name`, creating it on first use.
    pub fn operation(&mut self, name: &str) -> &mut Operation {
        self.operations
            .entry(name.to_string())
            .or_insert_with(|| Operation::new(name))
    }

    /// Lists the operations that have a pipeline bound, sorted by name.
    pub fn operations(&self) -> Vec<&str> {
        self.operations
            .values()
            .filter(|op| op.is_bound())
            .map(Operation::name)
            .collect()
    }

    /// Returns the shared resources.
    #[must_use]
    pub fn shared(&self) -> &Arc<SharedResources> {
        &self.shared
    }

    /// Creates the context for one request to `operation`.
    #[must_use]
    pub fn context_for(&self, operation: &str, request: InboundRequest) -> Context {
        Context::builder()
            .identity(RequestIdentity::new().with_operation(operation))
            .shared(Arc::clone(&self.shared))
            .request(request)
            .event_sink(Arc::clone(&self.event_sink))
            .build()
    }

    /// Runs the pipeline bound to `operation` with `input` in `ctx`.
    ///
    /// Unknown operations fail with `NotFound`, operations without a
    /// pipeline with a 501 `Http` failure.
    pub async fn invoke(
        &self,
        operation: &str,
        input: serde_json::Value,
        ctx: &Context,
    ) -> Result<serde_json::Value, StepError> {
        let Some(op) = self.operations.get(operation) else {
            return Err(StepError::not_found(format!("unknown operation '{operation}'")));
        };
        let Some(pipeline) = op.pipeline() else {
            return Err(StepError::http(
                501,
                format!("operation '{operation}' has no pipeline"),
            ));
        };

        pipeline.run(input, ctx).instrument(ctx.log().clone()).await
    }

    /// Handles one request to `operation`.
    pub async fn handle(&self, operation: &str, request: InboundRequest) -> OperationResponse {
        let ctx = self.context_for(operation, request);
        let started = Instant::now();

        let result = self.invoke(operation, serde_json::Value::Null, &ctx).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut headers = self.default_headers.clone();
        headers.extend(ctx.response().headers());

        match result {
            Ok(body) => {
                let status = ctx.response().status().unwrap_or(200);
                tracing::info!(parent: ctx.log(), status, duration_ms, "Operation completed");
                ctx.emit(
                    "operation.completed",
                    Some(serde_json::json!({ "status": status, "duration_ms": duration_ms })),
                );
                OperationResponse {
                    status,
                    headers,
                    body,
                }
            }
            Err(error) => {
                let status = error.status_code();
                tracing::error!(
                    parent: ctx.log(),
                    status,
                    duration_ms,
                    kind = %error.kind(),
                    error = %error,
                    "Operation failed"
                );
                ctx.emit(
                    "operation.failed",
                    Some(serde_json::json!({
                        "status": status,
                        "duration_ms": duration_ms,
                        "kind": error.kind().as_str(),
                        "error": error.to_string(),
                    })),
                );
                OperationResponse {
                    status,
                    headers,
                    body: error.to_body(),
                }
            }
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("operations", &self.operations.values().collect::<Vec<_>>())
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}
