//! Persistence backends for pipelines, runs, environments, promotions and usage.
//!
//! Everything is stored as JSON documents grouped into named collections.
//! Two backends implement [`StorageBackend`]:
//! - [`InMemoryStore`]: process-local maps, always available
//! - [`SqliteStore`]: a single-table SQLite document store
//!
//! Callers go through [`Store`], which always keeps an in-memory layer and
//! writes through to the durable backend chosen once at startup. Durable
//! failures are logged and never surfaced: the in-memory layer keeps the
//! system usable without a database.

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{StorageBackendKind, StorageSettings};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Named document collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Pipelines,
    PipelineVersions,
    Runs,
    Environments,
    Promotions,
    Deployments,
    Usage,
}

impl Collection {
    /// Every collection, in hydration order
    pub const ALL: [Collection; 7] = [
        Collection::Pipelines,
        Collection::PipelineVersions,
        Collection::Runs,
        Collection::Environments,
        Collection::Promotions,
        Collection::Deployments,
        Collection::Usage,
    ];

    /// Stable name used as the collection key in durable backends
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipelines => "pipelines",
            Self::PipelineVersions => "pipeline_versions",
            Self::Runs => "runs",
            Self::Environments => "environments",
            Self::Promotions => "promotions",
            Self::Deployments => "deployments",
            Self::Usage => "usage",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key/value document store partitioned by [`Collection`]
pub trait StorageBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Insert or replace a document
    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Fetch a document by key
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StorageError>;

    /// Remove a document, returning whether it existed
    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError>;

    /// All documents in a collection, ordered by key
    fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>, StorageError>;
}

/// Tiered store: an in-memory layer in front of an optional durable backend
pub struct Store {
    cache: InMemoryStore,
    durable: Option<Arc<dyn StorageBackend>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store {
    /// A store with no durable backend
    pub fn in_memory() -> Self {
        Self {
            cache: InMemoryStore::new(),
            durable: None,
        }
    }

    /// A store backed by `backend`, hydrated from its current contents
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        let cache = InMemoryStore::new();

        for collection in Collection::ALL {
            match backend.list(collection) {
                Ok(documents) => {
                    let count = documents.len();
                    for (key, value) in documents {
                        // InMemoryStore::put never fails
                        let _ = cache.put(collection, &key, &value);
                    }
                    debug!(%collection, count, "Hydrated collection");
                }
                Err(e) => {
                    warn!(%collection, error = %e, backend = backend.name(), "Failed to hydrate collection, continuing in memory");
                }
            }
        }

        Self {
            cache,
            durable: Some(backend),
        }
    }

    /// Open the backend described by `settings`.
    ///
    /// A backend that cannot be opened degrades to an in-memory store.
    pub fn open(settings: &StorageSettings) -> Self {
        match settings.backend {
            StorageBackendKind::Memory => {
                info!("Using in-memory storage");
                Self::in_memory()
            }
            StorageBackendKind::Sqlite => match SqliteStore::open(&settings.path) {
                Ok(sqlite) => {
                    info!(path = %settings.path.display(), "Using SQLite storage");
                    Self::with_backend(Arc::new(sqlite))
                }
                Err(e) => {
                    warn!(error = %e, "SQLite storage unavailable, falling back to memory");
                    Self::in_memory()
                }
            },
        }
    }

    /// Name of the durable backend, or "memory"
    pub fn backend_name(&self) -> &str {
        self.durable
            .as_ref()
            .map(|backend| backend.name())
            .unwrap_or_else(|| self.cache.name())
    }

    /// Whether writes reach a durable backend
    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Write a document to memory and, best-effort, to the durable backend
    pub fn put<T: Serialize>(&self, collection: Collection, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(%collection, key, error = %e, "Failed to serialize document");
                return;
            }
        };

        let _ = self.cache.put(collection, key, &value);

        if let Some(durable) = &self.durable {
            if let Err(e) = durable.put(collection, key, &value) {
                warn!(%collection, key, error = %e, "Durable write failed, kept in memory");
            }
        }
    }

    /// Read a document from the in-memory layer
    pub fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Option<T> {
        let value = self.cache.get(collection, key).ok().flatten()?;
        decode(collection, key, value)
    }

    /// Remove a document from both layers
    pub fn delete(&self, collection: Collection, key: &str) -> bool {
        let existed = self.cache.delete(collection, key).unwrap_or(false);

        if let Some(durable) = &self.durable {
            if let Err(e) = durable.delete(collection, key) {
                warn!(%collection, key, error = %e, "Durable delete failed");
            }
        }

        existed
    }

    /// All decodable documents in a collection, ordered by key
    pub fn list<T: DeserializeOwned>(&self, collection: Collection) -> Vec<T> {
        self.cache
            .list(collection)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| decode(collection, &key, value))
            .collect()
    }
}

/// Key for a document addressed by several free-form parts.
///
/// Parts are encoded as a JSON array, so distinct tuples never share a key
/// whatever characters the parts contain.
pub fn document_key(parts: &[&str]) -> String {
    Value::from(parts.to_vec()).to_string()
}

fn decode<T: DeserializeOwned>(collection: Collection, key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(%collection, key, error = %e, "Skipping undecodable document");
            None
        }
    }
}
