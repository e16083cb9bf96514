//! Event sinks for pipeline observability.
//!
//! Every [`Context`](crate::context::Context) carries a sink; combinators
//! report cache activity and composition failures through it.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};
