//! Test fixtures for pipeline testing.

use std::sync::Arc;

use crate::context::{Context, InboundRequest, RequestIdentity, SharedResources};
use crate::events::CollectingEventSink;
use crate::providers::MemoryDatastore;

/// Builds a [`Context`] wired to inspectable collaborators.
#[derive(Debug)]
pub struct TestContext {
    request: InboundRequest,
    operation: Option<String>,
    data: Vec<(String, serde_json::Value)>,
    datastore: Option<Arc<MemoryDatastore>>,
    sink: Arc<CollectingEventSink>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self {
            request: InboundRequest::new(),
            operation: None,
            data: Vec::new(),
            datastore: None,
            sink: Arc::new(CollectingEventSink::new()),
        }
    }
}

impl TestContext {
    /// Creates a new test context builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inbound request.
    #[must_use]
    pub fn with_request(mut self, request: InboundRequest) -> Self {
        self.request = request;
        self
    }

    /// Sets the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Seeds the data bag.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.push((key.into(), value));
        self
    }

    /// Attaches an in-memory datastore.
    #[must_use]
    pub fn with_datastore(mut self, datastore: Arc<MemoryDatastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Returns the sink that will record the context's events.
    #[must_use]
    pub fn events(&self) -> Arc<CollectingEventSink> {
        Arc::clone(&self.sink)
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> Context {
        let mut shared = SharedResources::new();
        if let Some(datastore) = self.datastore {
            shared = shared.with_datastore(datastore);
        }

        let mut identity = RequestIdentity::new();
        if let Some(operation) = self.operation {
            identity = identity.with_operation(operation);
        }

        let mut builder = Context::builder()
            .identity(identity)
            .shared(Arc::new(shared))
            .request(self.request)
            .event_sink(self.sink);
        for (key, value) in self.data {
            builder = builder.data(key, value);
        }
        builder.build()
    }
}
