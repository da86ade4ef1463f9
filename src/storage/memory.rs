//! Process-local document store.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;

use super::{Collection, StorageBackend, StorageError};

/// In-memory backend; contents are lost when the process exits
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Value>>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<(), StorageError> {
        self.collections
            .write()
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .collections
            .read()
            .get(&collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .collections
            .write()
            .get_mut(&collection)
            .map(|docs| docs.remove(key).is_some())
            .unwrap_or(false))
    }

    fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>, StorageError> {
        Ok(self
            .collections
            .read()
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
