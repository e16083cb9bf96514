//! Collaborators that leaf steps call out to.

mod datastore;
#[cfg(feature = "rest")]
mod rest;

pub use datastore::{datastore, Connection, Datastore, Lease, MemoryDatastore};
#[cfg(feature = "rest")]
pub use rest::{join_url, RestConfig, RestGet, RestProvider};
