//! Machine snapshot types

use crate::fetch::DefaultStateReference;
use bytes::Bytes;

/// Full serialized machine state at one instant
///
/// Opaque to everything except the machine executor. Backed by `Bytes`, so
/// clones share the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot(Bytes);

impl Snapshot {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for Snapshot {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Snapshot {
    fn from(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }
}

/// State handed to the machine bootstrap
///
/// Absence of an `InitialState` means a cold boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialState {
    /// Snapshot previously persisted in the store
    Saved(Snapshot),
    /// Validated baked-in default snapshot
    Default(DefaultStateReference),
}

impl InitialState {
    pub fn describe(&self) -> String {
        match self {
            InitialState::Saved(snapshot) => format!("saved snapshot ({} bytes)", snapshot.len()),
            InitialState::Default(reference) => format!("default state at {}", reference.location),
        }
    }
}
