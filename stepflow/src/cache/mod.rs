//! Bounded, time-limited, single-flight memoization of steps.
//!
//! ```
//! use stepflow::prelude::*;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), StepError> {
//! let fetch_detail = step_async(|id: u32, _ctx| async move { Ok(format!("pokemon {id}")) });
//! let cached = fetch_detail.cached(
//!     CacheConfig::new()
//!         .with_max_size(1000)
//!         .with_max_age(Duration::from_secs(300)),
//! )?;
//!
//! let ctx = Context::detached();
//! assert_eq!(cached.run(1, &ctx).await?, "pokemon 1");
//! # Ok(())
//! # }
//! ```

mod cached;
mod config;
mod key;
mod stats;
mod store;

pub use cached::Cache;
pub use config::CacheConfig;
pub use key::CacheKey;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{CacheStore, MemoryStore};
