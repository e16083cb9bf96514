//! The per-request execution context.

use super::{DataBag, InboundRequest, RequestIdentity, ResponseMeta, SharedResources};
use crate::events::{EventSink, NoOpEventSink};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::Span;

struct ContextInner {
    identity: RequestIdentity,
    data: DataBag,
    log: Span,
    shared: Arc<SharedResources>,
    request: InboundRequest,
    response: ResponseMeta,
    event_sink: Arc<dyn EventSink>,
}

/// Carries request-scoped state through a pipeline.
///
/// One `Context` is created per external request and dropped once the
/// pipeline has settled. Cloning is cheap and yields a handle to the same
/// request; contexts are never shared between requests.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Starts building a context.
    #[must_use]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Creates a context with no request data and empty shared resources.
    #[must_use]
    pub fn detached() -> Self {
        Self::builder().build()
    }

    /// Returns the request identity.
    #[must_use]
    pub fn identity(&self) -> &RequestIdentity {
        &self.inner.identity
    }

    /// Returns the mutable side-channel data.
    #[must_use]
    pub fn data(&self) -> &DataBag {
        &self.inner.data
    }

    /// Returns the request-scoped tracing span.
    ///
    /// Combinators log inside this span; steps may enter it too.
    #[must_use]
    pub fn log(&self) -> &Span {
        &self.inner.log
    }

    /// Returns the process-wide shared resources.
    #[must_use]
    pub fn shared(&self) -> &Arc<SharedResources> {
        &self.inner.shared
    }

    /// Returns the parsed triggering request.
    #[must_use]
    pub fn request(&self) -> &InboundRequest {
        &self.inner.request
    }

    /// Returns the response metadata.
    #[must_use]
    pub fn response(&self) -> &ResponseMeta {
        &self.inner.response
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.inner.event_sink
    }

    /// Emits an event enriched with the request identity.
    pub fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));

        if let serde_json::Value::Object(ref mut map) = enriched {
            for (key, value) in self.inner.identity.to_dict() {
                map.entry(key).or_insert(value);
            }
        }

        self.inner.event_sink.try_emit(event_type, Some(enriched));
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("identity", &self.inner.identity)
            .field("data_keys", &self.inner.data.keys())
            .field("shared", &self.inner.shared)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Context`].
#[derive(Default)]
pub struct ContextBuilder {
    identity: Option<RequestIdentity>,
    data: HashMap<String, serde_json::Value>,
    shared: Option<Arc<SharedResources>>,
    request: InboundRequest,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl ContextBuilder {
    /// Sets the request identity.
    #[must_use]
    pub fn identity(mut self, identity: RequestIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Seeds the data bag.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Sets the shared resources.
    #[must_use]
    pub fn shared(mut self, shared: Arc<SharedResources>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Sets the inbound request.
    #[must_use]
    pub fn request(mut self, request: InboundRequest) -> Self {
        self.request = request;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Builds the context and opens its request span.
    #[must_use]
    pub fn build(self) -> Context {
        let identity = self.identity.unwrap_or_default();
        let log = tracing::info_span!(
            "request",
            request_id = %identity.request_id,
            operation = identity.operation.as_deref().unwrap_or(""),
        );

        Context {
            inner: Arc::new(ContextInner {
                identity,
                data: DataBag::from_data(self.data),
                log,
                shared: self.shared.unwrap_or_default(),
                request: self.request,
                response: ResponseMeta::new(),
                event_sink: self
                    .event_sink
                    .unwrap_or_else(|| Arc::new(NoOpEventSink)),
            }),
        }
    }
}
