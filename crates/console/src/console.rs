//! Host terminal renderer
//!
//! The host terminal already interprets escape sequences, so rendering is a
//! straight write to its output. Key, paste and resize notifications are fed
//! in by the input pump.

use crossterm::{cursor, queue, terminal};
use parking_lot::Mutex;
use std::io::Write;
use tabvm_core::event::{Listeners, Subscription};
use tabvm_core::types::RendererEvent;
use tabvm_core::Renderer;
use tracing::warn;

pub struct ConsoleRenderer {
    out: Mutex<Box<dyn Write + Send>>,
    /// (rows, cols)
    size: Mutex<(u16, u16)>,
    listeners: Listeners<RendererEvent>,
}

impl ConsoleRenderer {
    pub fn new(out: Box<dyn Write + Send>, rows: u16, cols: u16) -> Self {
        Self {
            out: Mutex::new(out),
            size: Mutex::new((rows, cols)),
            listeners: Listeners::new(),
        }
    }

    /// Renderer on stdout sized to the current terminal
    pub fn stdout() -> Self {
        let (cols, rows) = terminal::size().unwrap_or((80, 24));
        Self::new(Box::new(std::io::stdout()), rows, cols)
    }

    /// Publish a notification to subscribers
    pub(crate) fn emit(&self, event: RendererEvent) {
        self.listeners.emit(event);
    }

    pub(crate) fn set_size(&self, rows: u16, cols: u16) {
        *self.size.lock() = (rows, cols);
    }
}

impl Renderer for ConsoleRenderer {
    fn write(&self, text: &str) {
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            warn!("Console write failed: {}", e);
        }
    }

    fn reset(&self) {
        let mut out = self.out.lock();
        let result = queue!(
            out,
            terminal::Clear(terminal::ClearType::All),
            terminal::Clear(terminal::ClearType::Purge),
            cursor::MoveTo(0, 0)
        )
        .and_then(|_| out.flush());
        if let Err(e) = result {
            warn!("Console reset failed: {}", e);
        }
    }

    fn fit(&self) {
        if let Ok((cols, rows)) = terminal::size() {
            self.set_size(rows, cols);
        }
    }

    fn rows(&self) -> u16 {
        self.size.lock().0
    }

    fn subscribe(&self) -> Subscription<RendererEvent> {
        self.listeners.subscribe()
    }
}
