//! Views of the triggering request and the pending response.
//!
//! The transport layer parses the wire request into an [`InboundRequest`]
//! before the pipeline runs; steps only read it. [`ResponseMeta`] lets a step
//! adjust the status and headers of the response before the pipeline's return
//! value is serialized.

use crate::errors::StepError;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Already-parsed parameters of the request that triggered a pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundRequest {
    /// Path parameters, e.g. `id` in `/pokemons/:id`.
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Query string parameters.
    #[serde(default)]
    pub query: HashMap<String, String>,
    /// Request headers, lowercase names.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Decoded request body.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl InboundRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a path parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Adds a header. The name is stored lowercase.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    /// Returns a path parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns a path parameter or a `BadRequest` failure naming it.
    pub fn require_param(&self, name: &str) -> Result<&str, StepError> {
        self.param(name)
            .ok_or_else(|| StepError::bad_request(format!("missing path parameter '{name}'")))
    }

    /// Returns a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Returns a header value, matching the name case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Deserializes the body into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Response metadata that steps may set as a side effect.
#[derive(Debug, Default)]
pub struct ResponseMeta {
    status: RwLock<Option<u16>>,
    headers: RwLock<HashMap<String, String>>,
}

impl ResponseMeta {
    /// Creates empty response metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the response status code.
    pub fn set_status(&self, status: u16) {
        *self.status.write() = Some(status);
    }

    /// Returns the status set by a step, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        *self.status.read()
    }

    /// Sets a response header, replacing an existing value.
    pub fn set_header(&self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .write()
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Returns a response header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.read().get(&name.to_ascii_lowercase()).cloned()
    }

    /// Returns a copy of all headers set so far.
    #[must_use]
    pub fn headers(&self) -> HashMap<String, String> {
        self.headers.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct NicknameBody {
        nickname: String,
    }

    #[test]
    fn test_request_accessors() {
        let request = InboundRequest::new()
            .with_param("id", "25")
            .with_query("limit", "20")
            .with_header("X-Trace", "abc")
            .with_body(serde_json::json!({"nickname": "sparky"}));

        assert_eq!(request.param("id"), Some("25"));
        assert_eq!(request.query_param("limit"), Some("20"));
        assert_eq!(request.header("x-trace"), Some("abc"));
        assert_eq!(
            request.body_as::<NicknameBody>().unwrap(),
            NicknameBody { nickname: "sparky".to_string() }
        );
    }

    #[test]
    fn test_require_param_missing() {
        let request = InboundRequest::new();
        let err = request.require_param("id").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_response_meta() {
        let meta = ResponseMeta::new();
        assert!(meta.status().is_none());

        meta.set_status(204);
        meta.set_header("Custom-Header", "myCustomHeader");

        assert_eq!(meta.status(), Some(204));
        assert_eq!(meta.header("custom-header"), Some("myCustomHeader".to_string()));
        assert_eq!(meta.headers().len(), 1);
    }
}
