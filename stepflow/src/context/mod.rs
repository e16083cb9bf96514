//! Request-scoped execution context.
//!
//! This module provides:
//! - The per-request [`Context`] handed to every step
//! - A thread-safe data bag for cross-stage side information
//! - Read-only views of the inbound request and the response metadata
//! - The process-wide resources injected at startup

mod bags;
mod execution;
mod http;
mod identity;
mod shared;

pub use bags::DataBag;
pub use execution::{Context, ContextBuilder};
pub use http::{InboundRequest, ResponseMeta};
pub use identity::RequestIdentity;
pub use shared::SharedResources;
