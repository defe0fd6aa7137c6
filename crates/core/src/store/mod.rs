//! Single-slot snapshot persistence
//!
//! [`SnapshotStore`] owns one fixed-key record in a [`KvBackend`]. Writing
//! replaces the previous record; there is no history. Read paths never fail:
//! a missing, unreadable or undecodable record resolves to "not found".

mod backend;
mod file;

pub use backend::{KvBackend, MemoryBackend, Schema};
pub use file::FileBackend;

use crate::codec::BlobCodec;
use crate::config::StoreConfig;
use crate::error::{CoreError, Result};
use crate::fetch::{DefaultStateReference, StateFetcher};
use crate::types::{InitialState, Snapshot};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Persisted representation of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: String,
    pub encoded_payload: String,
}

impl SnapshotRecord {
    pub fn encode(key: impl Into<String>, snapshot: &Snapshot) -> Self {
        Self {
            key: key.into(),
            encoded_payload: BlobCodec::encode(snapshot.as_bytes()),
        }
    }

    pub fn decode(&self) -> Result<Snapshot> {
        BlobCodec::decode(&self.encoded_payload).map(Snapshot::from)
    }
}

/// Entry point: opens the backing database for the configured slot
pub struct SnapshotStore {
    backend: Arc<dyn KvBackend>,
    config: StoreConfig,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    /// Open (creating on first use) the persistent store
    ///
    /// Idempotent. Fails with `StoreUnavailable`; callers fall back to the
    /// default state reference.
    pub async fn open(&self) -> Result<StoreHandle> {
        self.backend
            .open(&self.config.schema())
            .await
            .map_err(|e| {
                error!("Failed to open store {}: {}", self.config.db_name, e);
                CoreError::StoreUnavailable(e)
            })?;

        debug!("Opened store {} v{}", self.config.db_name, self.config.version);
        Ok(StoreHandle {
            backend: self.backend.clone(),
            config: self.config.clone(),
        })
    }
}

/// Handle to an opened slot
#[derive(Clone)]
pub struct StoreHandle {
    backend: Arc<dyn KvBackend>,
    config: StoreConfig,
}

impl StoreHandle {
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Fetch the persisted record itself, without decoding
    pub async fn get_record(&self) -> Option<SnapshotRecord> {
        let StoreConfig { collection, key, .. } = &self.config;
        match self.backend.get(collection, key).await {
            Ok(Some(encoded_payload)) => Some(SnapshotRecord {
                key: key.clone(),
                encoded_payload,
            }),
            Ok(None) => None,
            Err(e) => {
                error!("Failed to read state from store, treating as absent: {}", e);
                None
            }
        }
    }

    /// Previously written snapshot, or `None`
    pub async fn get(&self) -> Option<Snapshot> {
        let record = self.get_record().await?;
        match record.decode() {
            Ok(snapshot) => {
                debug!("Saved state found in store ({} bytes)", snapshot.len());
                Some(snapshot)
            }
            Err(e) => {
                warn!("Ignoring undecodable record {}: {}", record.key, e);
                None
            }
        }
    }

    /// Overwrite the slot; fails with `WriteFailed`
    pub async fn put(&self, snapshot: &Snapshot) -> Result<()> {
        let record = SnapshotRecord::encode(&self.config.key, snapshot);
        self.backend
            .put(&self.config.collection, &record.key, record.encoded_payload)
            .await
            .map_err(|e| {
                error!("Transaction aborted while saving state: {}", e);
                CoreError::WriteFailed(e.to_string())
            })?;
        debug!("State saved to store ({} bytes)", snapshot.len());
        Ok(())
    }

    /// Remove the slot; deleting an absent record succeeds
    pub async fn delete(&self) -> Result<()> {
        self.backend
            .delete(&self.config.collection, &self.config.key)
            .await
            .map_err(|e| {
                error!("Failed to clear state from store: {}", e);
                CoreError::WriteFailed(e.to_string())
            })?;
        debug!("State cleared from store");
        Ok(())
    }
}

/// Pick the machine's initial state
///
/// Order: saved snapshot, then the default reference if it probes reachable
/// with the expected content type, then nothing (cold boot). Never fails.
pub async fn resolve_initial_state(
    store: Option<&StoreHandle>,
    default: Option<&DefaultStateReference>,
    fetcher: &dyn StateFetcher,
) -> Option<InitialState> {
    if let Some(store) = store {
        if let Some(snapshot) = store.get().await {
            return Some(InitialState::Saved(snapshot));
        }
        debug!("No saved state found in store");
    }

    let default = default?;
    match fetcher.probe(&default.location).await {
        Ok(probe) if default.accepts(probe.content_type.as_deref()) => {
            debug!("Using default state at {}", default.location);
            Some(InitialState::Default(default.clone()))
        }
        Ok(probe) => {
            warn!(
                "Default state at {} has content type {:?}, expected {}; cold booting",
                default.location, probe.content_type, default.content_type
            );
            None
        }
        Err(e) => {
            warn!("Default state unreachable, cold booting: {}", e);
            None
        }
    }
}
