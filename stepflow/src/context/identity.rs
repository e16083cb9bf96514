//! Request identity for correlating logs and events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies one handled request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// The unique ID for this request.
    pub request_id: Uuid,

    /// The operation the request was routed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl Default for RequestIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdentity {
    /// Creates an identity with a generated request ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            operation: None,
        }
    }

    /// Creates an identity with a specific request ID.
    #[must_use]
    pub const fn with_request_id(request_id: Uuid) -> Self {
        Self {
            request_id,
            operation: None,
        }
    }

    /// Sets the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Converts to a flat map for event payloads.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert(
            "request_id".to_string(),
            serde_json::json!(self.request_id.to_string()),
        );
        if let Some(ref operation) = self.operation {
            map.insert("operation".to_string(), serde_json::json!(operation));
        }
        map
    }
}
