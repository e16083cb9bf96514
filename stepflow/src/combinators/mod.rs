//! Step combinators.
//!
//! Every combinator is itself a [`Step`](crate::steps::Step), so pipelines
//! are trees built once at startup and shared by all requests:
//! - [`Pipe`] sequences stages and stops at the first failure
//! - [`Parallel`] and [`Join`] fan out over one input
//! - [`ParallelMap`] fans one step out over a sequence
//! - [`Branch`] routes on a predicate

mod branch;
mod parallel;
mod parallel_map;
mod pipe;


pub use branch::Branch;
pub use parallel::{Join, Parallel};
pub use parallel_map::{Concurrency, ParallelMap};
pub use pipe::Pipe;
