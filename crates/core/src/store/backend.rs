//! Key/value storage backends
//!
//! A backend hosts one open database at a time. Opening declares a schema:
//! a name, a version, and the record collections it contains. Opening at a
//! newer version creates missing collections; opening at an older version
//! than the stored one is a conflict.

use crate::error::BackendError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Database schema declared at open time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub version: u32,
    pub collections: Vec<String>,
}

/// Transactional key/value store
///
/// Each call is its own transaction scoped to one collection: it either
/// completes or fails as a whole.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Open (creating or upgrading) the database described by `schema`
    async fn open(&self, schema: &Schema) -> Result<(), BackendError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, BackendError>;

    /// Insert or overwrite
    async fn put(&self, collection: &str, key: &str, value: String) -> Result<(), BackendError>;

    /// Remove; absent keys are not an error
    async fn delete(&self, collection: &str, key: &str) -> Result<(), BackendError>;
}

#[derive(Debug, Default)]
struct MemoryDatabase {
    version: u32,
    collections: HashMap<String, HashMap<String, String>>,
}

impl MemoryDatabase {
    fn used_bytes(&self) -> usize {
        self.collections
            .values()
            .flat_map(|records| records.values())
            .map(String::len)
            .sum()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    databases: HashMap<String, MemoryDatabase>,
    current: Option<String>,
    fail_open: bool,
    fail_reads: bool,
    fail_writes: bool,
    quota: Option<usize>,
}

impl MemoryState {
    fn current_db(&mut self) -> Result<&mut MemoryDatabase, BackendError> {
        let name = self.current.clone().ok_or(BackendError::NotOpen)?;
        self.databases.get_mut(&name).ok_or(BackendError::NotOpen)
    }
}

/// In-memory backend with fault injection
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total size of stored values
    pub fn with_quota(self, bytes: usize) -> Self {
        self.state.lock().quota = Some(bytes);
        self
    }

    /// Make every `open` fail, as with storage disabled by the user
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Number of records across all collections of the open database
    pub fn record_count(&self) -> usize {
        let mut state = self.state.lock();
        state
            .current_db()
            .map(|db| db.collections.values().map(HashMap::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn open(&self, schema: &Schema) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(BackendError::Aborted("storage disabled".into()));
        }

        let db = state.databases.entry(schema.name.clone()).or_default();
        if db.version > schema.version {
            return Err(BackendError::VersionConflict {
                stored: db.version,
                requested: schema.version,
            });
        }
        if db.version < schema.version {
            tracing::debug!(
                "Upgrading {} from version {} to {}",
                schema.name,
                db.version,
                schema.version
            );
            for collection in &schema.collections {
                db.collections.entry(collection.clone()).or_default();
            }
            db.version = schema.version;
        }
        state.current = Some(schema.name.clone());
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, BackendError> {
        let mut state = self.state.lock();
        if state.fail_reads {
            return Err(BackendError::Aborted("read failed".into()));
        }
        let records = state
            .current_db()?
            .collections
            .get(collection)
            .ok_or_else(|| BackendError::UnknownCollection(collection.to_string()))?;
        Ok(records.get(key).cloned())
    }

    async fn put(&self, collection: &str, key: &str, value: String) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(BackendError::Aborted("write failed".into()));
        }
        let quota = state.quota;
        let db = state.current_db()?;
        if !db.collections.contains_key(collection) {
            return Err(BackendError::UnknownCollection(collection.to_string()));
        }

        if let Some(quota) = quota {
            let replaced = db
                .collections
                .get(collection)
                .and_then(|records| records.get(key))
                .map(String::len)
                .unwrap_or(0);
            let available = quota.saturating_sub(db.used_bytes() - replaced);
            if value.len() > available {
                return Err(BackendError::QuotaExceeded {
                    needed: value.len(),
                    available,
                });
            }
        }

        db.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(BackendError::Aborted("write failed".into()));
        }
        let records = state
            .current_db()?
            .collections
            .get_mut(collection)
            .ok_or_else(|| BackendError::UnknownCollection(collection.to_string()))?;
        records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(version: u32, collections: &[&str]) -> Schema {
        Schema {
            name: "db".into(),
            version,
            collections: collections.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_requires_open() {
        let backend = MemoryBackend::new();
        let result = backend.get("states", "k").await;
        assert!(matches!(result, Err(BackendError::NotOpen)));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        backend.open(&schema(1, &["states"])).await.unwrap();

        backend.put("states", "k", "v1".into()).await.unwrap();
        backend.put("states", "k", "v2".into()).await.unwrap();
        assert_eq!(backend.get("states", "k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(backend.record_count(), 1);

        backend.delete("states", "k").await.unwrap();
        backend.delete("states", "k").await.unwrap();
        assert_eq!(backend.get("states", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let backend = MemoryBackend::new();
        backend.open(&schema(1, &["states"])).await.unwrap();
        let result = backend.put("other", "k", "v".into()).await;
        assert!(matches!(result, Err(BackendError::UnknownCollection(_))));
    }

    #[tokio::test]
    async fn test_schema_upgrade_and_conflict() {
        let backend = MemoryBackend::new();
        backend.open(&schema(1, &["states"])).await.unwrap();
        backend.put("states", "k", "v".into()).await.unwrap();

        // Upgrade adds a collection and keeps existing records
        backend.open(&schema(2, &["states", "extra"])).await.unwrap();
        backend.put("extra", "k", "v".into()).await.unwrap();
        assert_eq!(backend.get("states", "k").await.unwrap().as_deref(), Some("v"));

        // Reopening at the same version is idempotent
        backend.open(&schema(2, &["states", "extra"])).await.unwrap();

        let result = backend.open(&schema(1, &["states"])).await;
        assert!(matches!(
            result,
            Err(BackendError::VersionConflict { stored: 2, requested: 1 })
        ));
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let backend = MemoryBackend::new().with_quota(8);
        backend.open(&schema(1, &["states"])).await.unwrap();

        backend.put("states", "k", "12345678".into()).await.unwrap();
        // Overwriting the same key only counts the new value
        backend.put("states", "k", "abcdefgh".into()).await.unwrap();

        let result = backend.put("states", "other", "x".into()).await;
        assert!(matches!(
            result,
            Err(BackendError::QuotaExceeded { needed: 1, available: 0 })
        ));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryBackend::new();
        backend.set_fail_open(true);
        assert!(backend.open(&schema(1, &["states"])).await.is_err());

        backend.set_fail_open(false);
        backend.open(&schema(1, &["states"])).await.unwrap();
        backend.set_fail_writes(true);
        assert!(backend.put("states", "k", "v".into()).await.is_err());
        assert!(backend.delete("states", "k").await.is_err());

        backend.set_fail_reads(true);
        assert!(backend.get("states", "k").await.is_err());
    }
}
