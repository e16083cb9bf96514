//! Testing utilities for stepflow pipelines.
//!
//! This module provides:
//! - Mock steps that count, record, delay or fail
//! - A context fixture wired to a collecting event sink
//! - Assertions for step failures and emitted events

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_event_count, assert_failed_with};
pub use fixtures::TestContext;
pub use mocks::{CallJournal, CountingStep, DelayStep, FailingStep, RecordingStep};
