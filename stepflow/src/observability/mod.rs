//! Observability utilities.
//!
//! The combinators log through `tracing` inside each request's span and emit
//! lifecycle events through the context's
//! [`EventSink`](crate::events::EventSink). This module installs a
//! subscriber for applications that do not bring their own.

mod logging;

pub use logging::{init_logging, LoggingConfig, LOG_ENV_VAR};
