//! Thread-safe request-scoped data bag.

use crate::errors::StepError;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// Side-channel values passed between stages of one request.
///
/// Keys are free-form strings; each pipeline documents the keys it uses. An
/// early stage can, for example, stash a path parameter under `"pokemonId"`
/// for a later stage to read.
#[derive(Debug, Default)]
pub struct DataBag {
    data: RwLock<HashMap<String, serde_json::Value>>,
}

impl DataBag {
    /// Creates a new empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bag from existing data.
    #[must_use]
    pub fn from_data(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Gets a value from the bag.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    /// Gets a value and deserializes it into `T`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StepError> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Sets a value, replacing and returning any previous one.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.data.write().insert(key.into(), value)
    }

    /// Serializes `value` and stores it under `key`.
    pub fn insert_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), StepError> {
        let value = serde_json::to_value(value)?;
        self.insert(key, value);
        Ok(())
    }

    /// Sets a value only if the key is not present yet.
    ///
    /// # Errors
    ///
    /// Returns a `Conflict` error if the key already exists.
    pub fn insert_new(&self, key: impl Into<String>, value: serde_json::Value) -> Result<(), StepError> {
        let key = key.into();
        let mut data = self.data.write();

        if data.contains_key(&key) {
            return Err(StepError::conflict(format!("data key '{key}' already exists")));
        }

        data.insert(key, value);
        Ok(())
    }

    /// Removes a value.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.data.write().remove(key)
    }

    /// Returns a copy of all data.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}
