//! Directory-backed key/value store
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<db>/schema.json
//! <root>/<db>/<collection>/<key>.json    { "key": ..., "value": ... }
//! ```
//!
//! Records are written to a temporary file and renamed into place, so a
//! crash mid-write leaves the previous record intact.

use super::backend::{KvBackend, Schema};
use crate::error::BackendError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const SCHEMA_FILE: &str = "schema.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSchema {
    version: u32,
    collections: BTreeSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    value: String,
}

#[derive(Debug, Clone)]
struct OpenDatabase {
    dir: PathBuf,
    collections: BTreeSet<String>,
}

/// Key/value store persisted as JSON files
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    open: Mutex<Option<OpenDatabase>>,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, BackendError> {
        let open = self.open.lock();
        let db = open.as_ref().ok_or(BackendError::NotOpen)?;
        if !db.collections.contains(collection) {
            return Err(BackendError::UnknownCollection(collection.to_string()));
        }
        Ok(db.dir.join(sanitize(collection)))
    }

    fn record_path(&self, collection: &str, key: &str) -> Result<PathBuf, BackendError> {
        Ok(self
            .collection_dir(collection)?
            .join(format!("{}.json", sanitize(key))))
    }
}

/// Make a name safe to use as a single path component
fn sanitize(name: &str) -> String {
    name.replace(|c: char| !c.is_alphanumeric() && c != '-' && c != '_', "_")
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), BackendError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl KvBackend for FileBackend {
    async fn open(&self, schema: &Schema) -> Result<(), BackendError> {
        let dir = self.root.join(sanitize(&schema.name));
        tokio::fs::create_dir_all(&dir).await?;

        let schema_path = dir.join(SCHEMA_FILE);
        let mut stored = match tokio::fs::read(&schema_path).await {
            Ok(raw) => serde_json::from_slice::<StoredSchema>(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => StoredSchema::default(),
            Err(e) => return Err(e.into()),
        };

        if stored.version > schema.version {
            return Err(BackendError::VersionConflict {
                stored: stored.version,
                requested: schema.version,
            });
        }

        if stored.version < schema.version {
            tracing::debug!(
                "Upgrading {} from version {} to {}",
                schema.name,
                stored.version,
                schema.version
            );
            stored.version = schema.version;
            stored.collections.extend(schema.collections.iter().cloned());
            for collection in &stored.collections {
                tokio::fs::create_dir_all(dir.join(sanitize(collection))).await?;
            }
            write_atomic(&schema_path, &serde_json::to_vec_pretty(&stored)?).await?;
        }

        *self.open.lock() = Some(OpenDatabase {
            dir,
            collections: stored.collections,
        });
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, BackendError> {
        let path = self.record_path(collection, key)?;
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let record: StoredRecord = serde_json::from_slice(&raw)?;
                Ok(Some(record.value))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, collection: &str, key: &str, value: String) -> Result<(), BackendError> {
        let path = self.record_path(collection, key)?;
        let record = StoredRecord {
            key: key.to_string(),
            value,
        };
        write_atomic(&path, &serde_json::to_vec(&record)?).await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), BackendError> {
        let path = self.record_path(collection, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
