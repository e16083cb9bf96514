//! Error types for the stepflow framework.
//!
//! A single cloneable [`StepError`] flows through every combinator so that a
//! failure produced deep inside a pipeline reaches the operation binder with
//! its kind intact. Cache store problems use their own type,
//! [`CacheStoreError`], because they must never be confused with a miss.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result alias used by steps and combinators.
pub type PipelineResult<T> = Result<T, StepError>;

/// Classification of a step failure.
///
/// The kind decides which transport status the operation binder reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The inbound request was malformed or a configuration value is invalid.
    BadRequest,
    /// The requested resource does not exist.
    NotFound,
    /// The operation conflicts with existing state.
    Conflict,
    /// A remote dependency could not be reached or misbehaved.
    Upstream,
    /// The datastore rejected or failed an operation.
    Datastore,
    /// A step exceeded its time allowance.
    Timeout,
    /// An unexpected internal failure.
    Internal,
    /// A remote call answered with a non-success HTTP status.
    Http(u16),
}

impl ErrorKind {
    /// Returns the HTTP status conventionally associated with this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Upstream => 502,
            Self::Datastore | Self::Internal => 500,
            Self::Timeout => 504,
            Self::Http(status) => status,
        }
    }

    /// Returns a stable machine-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Upstream => "upstream",
            Self::Datastore => "datastore",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Http(_) => "http",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(status) => write!(f, "http {status}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A failure raised by a step, or surfaced unchanged by a combinator.
///
/// Cloning is cheap: the optional source is reference counted, which lets the
/// cache hand the same failure to every caller waiting on one invocation.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    /// Set once the pipe stage the failure escaped from has logged it.
    reported: bool,
}

impl StepError {
    /// Creates a new step error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            reported: false,
        }
    }

    /// Creates a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Creates an upstream (transport) error.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    /// Creates an error for a non-success HTTP response.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http(status), message)
    }

    /// Creates a datastore error.
    #[must_use]
    pub fn datastore(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Datastore, message)
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = source.into().into();
        self.source = Some(Arc::from(boxed));
        self
    }

    /// Returns the failure kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the transport status for this failure.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub(crate) const fn is_reported(&self) -> bool {
        self.reported
    }

    #[must_use]
    pub(crate) fn mark_reported(mut self) -> Self {
        self.reported = true;
        self
    }

    #[must_use]
    pub(crate) fn unreported(mut self) -> Self {
        self.reported = false;
        self
    }

    /// Builds the JSON error body returned to external callers.
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        let message = if self.message.is_empty() {
            "Unknown error"
        } else {
            self.message.as_str()
        };

        serde_json::json!({
            "statusCode": self.status_code(),
            "kind": self.kind.as_str(),
            "message": message,
        })
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("invalid JSON value: {err}")).with_source(err)
    }
}

/// Failure of the cache store itself, as opposed to the wrapped step.
#[derive(Debug, Clone, Error)]
pub enum CacheStoreError {
    /// The store could not be reached.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// The store holds state it cannot interpret.
    #[error("cache store corrupted: {0}")]
    Corrupted(String),

    /// No key could be derived from the step input.
    #[error("cannot derive cache key: {0}")]
    KeyDerivation(String),
}
