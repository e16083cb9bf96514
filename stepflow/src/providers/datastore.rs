//! Scoped datastore access.
//!
//! A step acquires a [`Lease`] at the start of its invocation and drops it
//! before returning. The lease gives its pooled slot back on drop, so the
//! slot is released on every exit path including `?` and panics.

use crate::context::Context;
use crate::errors::StepError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Operations available on an acquired connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Reads the value stored under `key` in `table`.
    async fn fetch(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>, StepError>;

    /// Writes `value` under `key` in `table`, replacing any previous value.
    async fn store(&self, table: &str, key: &str, value: serde_json::Value) -> Result<(), StepError>;

    /// Writes `value` under `key` in `table`, failing with `Conflict` if the
    /// key already exists.
    async fn insert(&self, table: &str, key: &str, value: serde_json::Value) -> Result<(), StepError>;
}

/// A pool of connections shared by every request.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Acquires a connection for the duration of one step invocation.
    async fn acquire(&self) -> Result<Lease, StepError>;
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A connection borrowed from a [`Datastore`].
pub struct Lease {
    connection: Box<dyn Connection>,
    release: Option<Release>,
}

impl Lease {
    /// Wraps a connection and the action that returns it to its pool.
    pub fn new<R>(connection: Box<dyn Connection>, release: R) -> Self
    where
        R: FnOnce() + Send + Sync + 'static,
    {
        Self {
            connection,
            release: Some(Box::new(release)),
        }
    }
}

impl Deref for Lease {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!("Releasing the connection to the datastore");
            release();
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}

/// Returns the datastore injected into the shared resources.
pub fn datastore(ctx: &Context) -> Result<&Arc<dyn Datastore>, StepError> {
    ctx.shared()
        .datastore()
        .ok_or_else(|| StepError::internal("no datastore configured"))
}

type Tables = DashMap<String, DashMap<String, serde_json::Value>>;

struct MemoryConnection {
    tables: Arc<Tables>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn fetch(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>, StepError> {
        let Some(rows) = self.tables.get(table) else {
            return Ok(None);
        };
        let value = rows.get(key).map(|value| value.clone());
        Ok(value)
    }

    async fn store(&self, table: &str, key: &str, value: serde_json::Value) -> Result<(), StepError> {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn insert(&self, table: &str, key: &str, value: serde_json::Value) -> Result<(), StepError> {
        // The table entry stays locked until the row is written.
        let rows = self.tables.entry(table.to_string()).or_default();
        if rows.contains_key(key) {
            return Err(StepError::conflict(format!(
                "{table} already has a row for '{key}'"
            )));
        }
        rows.insert(key.to_string(), value);
        Ok(())
    }
}

/// An in-process datastore with a bounded connection pool.
pub struct MemoryDatastore {
    tables: Arc<Tables>,
    pool: Arc<Semaphore>,
    pool_size: usize,
    active: Arc<AtomicUsize>,
    acquire_timeout: Duration,
}

impl MemoryDatastore {
    /// Creates a datastore allowing `pool_size` simultaneous leases.
    #[must_use]
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            tables: Arc::new(DashMap::new()),
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            active: Arc::new(AtomicUsize::new(0)),
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// Sets how long `acquire` waits for a free slot.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Returns the number of leases currently held.
    #[must_use]
    pub fn active_leases(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the number of free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.pool.available_permits()
    }

    /// Returns the pool size.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl fmt::Debug for MemoryDatastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDatastore")
            .field("tables", &self.tables.len())
            .field("pool_size", &self.pool_size)
            .field("active", &self.active_leases())
            .finish()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn acquire(&self) -> Result<Lease, StepError> {
        tracing::debug!("Opening the connection to the datastore");

        let permit: OwnedSemaphorePermit =
            tokio::time::timeout(self.acquire_timeout, Arc::clone(&self.pool).acquire_owned())
                .await
                .map_err(|_| {
                    StepError::timeout(format!(
                        "no datastore connection available within {}ms",
                        self.acquire_timeout.as_millis()
                    ))
                })?
                .map_err(|e| StepError::datastore("connection pool closed").with_source(e))?;

        self.active.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active);

        Ok(Lease::new(
            Box::new(MemoryConnection {
                tables: Arc::clone(&self.tables),
            }),
            move || {
                active.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            },
        ))
    }
}
