//! Test assertions for step results and events.

use crate::errors::{ErrorKind, StepError};
use crate::events::CollectingEventSink;
use std::fmt::Debug;

/// Asserts that a step failed with the expected kind.
pub fn assert_failed_with<T: Debug>(result: &Result<T, StepError>, expected: ErrorKind) {
    match result {
        Ok(value) => panic!("Expected {expected} failure, got success: {value:?}"),
        Err(error) => assert_eq!(
            error.kind(),
            expected,
            "Expected {expected} failure, got: {error}"
        ),
    }
}

/// Asserts that exactly `expected` events of `event_type` were recorded.
pub fn assert_event_count(sink: &CollectingEventSink, event_type: &str, expected: usize) {
    let actual = sink.count(event_type);
    assert_eq!(
        actual,
        expected,
        "Expected {expected} '{event_type}' events, got {actual}. Recorded: {:?}",
        sink.events().iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>()
    );
}
