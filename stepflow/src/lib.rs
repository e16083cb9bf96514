//! # Stepflow
//!
//! Composable async request pipelines.
//!
//! A request handler is written as a tree of [`Step`](steps::Step)s built
//! once at startup and shared by every request:
//!
//! - **Steps**: async functions of an input and the request [`Context`](context::Context)
//! - **Combinators**: sequential pipes, fan-out over one input or over a
//!   sequence, and predicate branches
//! - **Caching**: bounded, time-limited memoization with single-flight
//!   coalescing of concurrent identical calls
//! - **Operation binding**: named operations answering transport-neutral
//!   requests
//! - **Providers**: a REST client and a pooled datastore for leaf steps
//!
//! ## Quick Start
//!
//! ```rust
//! use stepflow::prelude::*;
//!
//! # async fn demo() -> Result<(), StepError> {
//! let extract_id = step(|url: String, _ctx: &Context| {
//!     url.rsplit('/')
//!         .next()
//!         .and_then(|id| id.parse::<u32>().ok())
//!         .ok_or_else(|| StepError::bad_request("no id in url"))
//! });
//! let fetch_detail = map(|id: u32| format!("pokemon #{id}"));
//!
//! let detail = Pipe::new(extract_id)
//!     .then(fetch_detail)
//!     .cached(CacheConfig::new().with_max_size(1000))?;
//! let details = ParallelMap::over(detail);
//!
//! let urls = vec!["/pokemon/1".to_string(), "/pokemon/1".to_string()];
//! let out = details.run(urls, &Context::detached()).await?;
//! assert_eq!(out, vec!["pokemon #1", "pokemon #1"]);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod combinators;
pub mod context;
pub mod errors;
pub mod events;
pub mod observability;
pub mod providers;
pub mod resolver;
pub mod steps;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{Cache, CacheConfig, CacheStore, MemoryStore};
    pub use crate::combinators::{Branch, Concurrency, Join, Parallel, ParallelMap, Pipe};
    pub use crate::context::{Context, InboundRequest, SharedResources};
    pub use crate::errors::{ErrorKind, PipelineResult, StepError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, LoggingConfig};
    pub use crate::providers::{datastore, Connection, Datastore, MemoryDatastore};
    #[cfg(feature = "rest")]
    pub use crate::providers::{RestConfig, RestProvider};
    pub use crate::resolver::{set_header, set_status, OperationResponse, Resolver};
    pub use crate::steps::{map, step, step_async, tap, BoxStep, Named, Step, StepExt};
    pub use crate::{parallel, pipe};
}
