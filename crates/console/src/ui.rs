//! Console notifier
//!
//! Alerts and questions are printed inline on the terminal. A question stays
//! pending until the input pump hands in the answer.

use async_trait::async_trait;
use crossterm::{execute, terminal::SetTitle};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use tabvm_core::Notifier;
use tokio::sync::oneshot;
use tracing::{debug, warn};

const TITLE: &str = "tabvm";

pub struct ConsoleUi {
    out: Mutex<Box<dyn Write + Send>>,
    controls_enabled: AtomicBool,
    loading: AtomicBool,
    pending: Mutex<Option<oneshot::Sender<bool>>>,
}

impl ConsoleUi {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            controls_enabled: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn controls_enabled(&self) -> bool {
        self.controls_enabled.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// A question is waiting for an answer
    pub fn is_confirming(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Answer the pending question; returns false if none was pending
    pub fn answer(&self, yes: bool) -> bool {
        match self.pending.lock().take() {
            Some(tx) => {
                self.print(if yes { "yes\r\n" } else { "no\r\n" });
                tx.send(yes).is_ok()
            }
            None => false,
        }
    }

    fn print(&self, text: &str) {
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            warn!("Console notifier write failed: {}", e);
        }
    }
}

#[async_trait]
impl Notifier for ConsoleUi {
    fn set_controls_enabled(&self, enabled: bool) {
        debug!("Controls {}", if enabled { "enabled" } else { "disabled" });
        self.controls_enabled.store(enabled, Ordering::SeqCst);
    }

    fn set_loading(&self, loading: bool) {
        if self.loading.swap(loading, Ordering::SeqCst) == loading {
            return;
        }
        let title = if loading {
            format!("{TITLE} (loading)")
        } else {
            TITLE.to_string()
        };
        let mut out = self.out.lock();
        if let Err(e) = execute!(out, SetTitle(title)) {
            debug!("Failed to set terminal title: {}", e);
        }
    }

    fn alert(&self, message: &str) {
        warn!("{}", message);
        self.print(&format!("\r\n\x1b[1;31m{message}\x1b[0m\r\n"));
    }

    async fn confirm(&self, question: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        // A newer question replaces an unanswered one, which reads as "no"
        *self.pending.lock() = Some(tx);
        self.print(&format!("\r\n\x1b[1;33m{question}\x1b[0m [y/n] "));
        rx.await.unwrap_or(false)
    }
}
