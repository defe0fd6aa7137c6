//! Output gate: suppresses machine output during sensitive windows

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag controlling whether decoded output reaches the renderer
///
/// Closed while a snapshot restore is sequenced and while the shell settles
/// after a resize. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct OutputGate {
    open: Arc<AtomicBool>,
}

impl OutputGate {
    /// New gate, initially closed
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.set(true);
    }

    pub fn close(&self) {
        self.set(false);
    }

    pub fn set(&self, open: bool) {
        let was = self.open.swap(open, Ordering::SeqCst);
        if was != open {
            tracing::trace!("Output gate {}", if open { "opened" } else { "closed" });
        }
    }
}
