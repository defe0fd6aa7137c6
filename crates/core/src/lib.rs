//! Tabvm Core - session logic for a snapshot-persistent virtual machine
//!
//! This crate provides:
//! - Snapshot persistence (single-slot store, data-URL codec, backends)
//! - Boot readiness detection
//! - Serial output coalescing and input routing
//! - The session controller tying them together
//!
//! The machine, renderer, clipboard and notifier are collaborator traits;
//! mock implementations are exported for tests and demos.

pub mod boot;
pub mod codec;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod gate;
pub mod input;
pub mod machine;
pub mod notify;
pub mod session;
pub mod store;
pub mod terminal;
pub mod types;

pub use boot::{BootGate, BootPath};
pub use codec::BlobCodec;
pub use coalescer::OutputCoalescer;
pub use config::{SessionConfig, StoreConfig, DEFAULT_SENTINEL};
pub use error::{BackendError, CoreError, Result};
pub use event::{Listeners, Subscription};
pub use fetch::{AnyFetcher, DefaultStateReference, HttpFetcher, LocalFetcher, StateFetcher};
pub use gate::OutputGate;
pub use input::{InputRouter, KeyAction};
pub use machine::{Machine, MachineLauncher};
pub use notify::Notifier;
pub use session::{RestoreOutcome, Session, SessionCommand, SessionDeps, SessionExit};
pub use store::{FileBackend, KvBackend, MemoryBackend, SnapshotRecord, SnapshotStore, StoreHandle};
pub use terminal::{Clipboard, Renderer};
pub use types::{InitialState, MachineEvent, RendererEvent, Snapshot};
