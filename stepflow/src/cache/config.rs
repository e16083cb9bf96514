//! Cache configuration.

use crate::errors::StepError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds for a [`Cache`](super::Cache).
///
/// Both limits default to unbounded.
///
/// ```
/// use stepflow::cache::CacheConfig;
/// use std::time::Duration;
///
/// let config: CacheConfig = serde_json::from_str(r#"{"max_size": 1000, "max_age_ms": 60000}"#).unwrap();
/// assert_eq!(config.max_size, Some(1000));
/// assert_eq!(config.max_age, Some(Duration::from_secs(60)));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of keys retained.
    pub max_size: Option<usize>,
    /// Time-to-live of an entry, measured from insertion.
    #[serde(rename = "max_age_ms", with = "duration_ms")]
    pub max_age: Option<Duration>,
}

impl CacheConfig {
    /// Creates an unbounded configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_size: None,
            max_age: None,
        }
    }

    /// Sets the maximum entry count.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Sets the entry time-to-live.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Checks that every configured bound is positive.
    pub fn validate(&self) -> Result<(), StepError> {
        if self.max_size == Some(0) {
            return Err(StepError::bad_request(
                "cache max_size must be greater than zero",
            ));
        }
        if self.max_age.is_some_and(|age| age.is_zero()) {
            return Err(StepError::bad_request(
                "cache max_age must be greater than zero",
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
