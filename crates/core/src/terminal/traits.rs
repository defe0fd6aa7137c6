//! Renderer and clipboard traits

use crate::error::{CoreError, Result};
use crate::event::{Listeners, Subscription};
use crate::types::{InputEvent, KeyEvent, RendererEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

/// Text-grid terminal renderer
///
/// Escape-sequence interpretation and drawing live behind this trait.
pub trait Renderer: Send + Sync {
    /// Write decoded text at the cursor
    fn write(&self, text: &str);

    /// Clear the display and scrollback
    fn reset(&self);

    /// Resize the grid to fit its container
    fn fit(&self);

    /// Current visible row count
    fn rows(&self) -> u16;

    /// Move keyboard focus to the terminal
    fn focus(&self) {}

    /// Register for key, input and resize notifications
    fn subscribe(&self) -> Subscription<RendererEvent>;
}

/// System clipboard access
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Read the clipboard as text
    async fn read_text(&self) -> Result<String>;

    /// Copy the current terminal selection using the platform's native copy
    fn copy_selection(&self) -> Result<()>;
}

/// Mock renderer for testing
pub struct MockRenderer {
    rows: AtomicU16,
    cols: AtomicU16,
    writes: Mutex<Vec<String>>,
    resets: AtomicUsize,
    fits: AtomicUsize,
    focused: AtomicBool,
    listeners: Listeners<RendererEvent>,
}

impl MockRenderer {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows: AtomicU16::new(rows),
            cols: AtomicU16::new(cols),
            writes: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
            fits: AtomicUsize::new(0),
            focused: AtomicBool::new(false),
            listeners: Listeners::new(),
        }
    }

    /// Every `write` call, in order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// All written text concatenated
    pub fn output(&self) -> String {
        self.writes.lock().concat()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn fit_count(&self) -> usize {
        self.fits.load(Ordering::SeqCst)
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    /// Simulate a key press
    pub fn press(&self, key: KeyEvent) {
        self.listeners.emit(RendererEvent::Key(key));
    }

    /// Simulate a text-input notification
    pub fn input(&self, event: InputEvent) {
        self.listeners.emit(RendererEvent::Input(event));
    }

    /// Simulate the container changing size
    pub fn resize(&self, rows: u16) {
        self.rows.store(rows, Ordering::SeqCst);
        let cols = self.cols.load(Ordering::SeqCst);
        self.listeners.emit(RendererEvent::Resize { rows, cols });
    }
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl Renderer for MockRenderer {
    fn write(&self, text: &str) {
        self.writes.lock().push(text.to_string());
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn fit(&self) {
        self.fits.fetch_add(1, Ordering::SeqCst);
    }

    fn rows(&self) -> u16 {
        self.rows.load(Ordering::SeqCst)
    }

    fn focus(&self) {
        self.focused.store(true, Ordering::SeqCst);
    }

    fn subscribe(&self) -> Subscription<RendererEvent> {
        self.listeners.subscribe()
    }
}

/// Mock clipboard for testing
#[derive(Default)]
pub struct MockClipboard {
    text: Mutex<Option<String>>,
    copies: AtomicUsize,
}

impl MockClipboard {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(Some(text.into())),
            copies: AtomicUsize::new(0),
        }
    }

    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clipboard for MockClipboard {
    async fn read_text(&self) -> Result<String> {
        self.text
            .lock()
            .clone()
            .ok_or_else(|| CoreError::Clipboard("clipboard is empty".into()))
    }

    fn copy_selection(&self) -> Result<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
