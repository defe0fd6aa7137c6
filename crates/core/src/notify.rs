//! User-facing notifications
//!
//! The session never draws its own UI. It reports loading state and control
//! availability, raises blocking alerts, and asks yes/no questions through a
//! [`Notifier`] supplied by the front-end.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Enable or disable the user action controls
    fn set_controls_enabled(&self, enabled: bool);

    /// Show or hide the loading indicator
    fn set_loading(&self, loading: bool);

    /// Blocking error notification
    fn alert(&self, message: &str);

    /// Ask a yes/no question; `true` means yes
    async fn confirm(&self, question: &str) -> bool;
}

/// Disables the controls for its lifetime
pub(crate) struct ControlsGuard {
    notifier: Arc<dyn Notifier>,
}

impl ControlsGuard {
    pub(crate) fn new(notifier: Arc<dyn Notifier>) -> Self {
        notifier.set_controls_enabled(false);
        Self { notifier }
    }
}

impl Drop for ControlsGuard {
    fn drop(&mut self) {
        self.notifier.set_controls_enabled(true);
    }
}

/// Mock notifier for testing
#[derive(Default)]
pub struct MockNotifier {
    controls: Mutex<Vec<bool>>,
    loading: Mutex<Vec<bool>>,
    alerts: Mutex<Vec<String>>,
    questions: Mutex<Vec<String>>,
    answer: AtomicBool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `confirm` with `answer`
    pub fn answering(answer: bool) -> Self {
        let notifier = Self::default();
        notifier.set_answer(answer);
        notifier
    }

    pub fn set_answer(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
    }

    /// Every `set_controls_enabled` call, in order
    pub fn control_changes(&self) -> Vec<bool> {
        self.controls.lock().clone()
    }

    pub fn controls_enabled(&self) -> bool {
        self.controls.lock().last().copied().unwrap_or(false)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.lock().last().copied().unwrap_or(false)
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().clone()
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn set_controls_enabled(&self, enabled: bool) {
        self.controls.lock().push(enabled);
    }

    fn set_loading(&self, loading: bool) {
        self.loading.lock().push(loading);
    }

    fn alert(&self, message: &str) {
        self.alerts.lock().push(message.to_string());
    }

    async fn confirm(&self, question: &str) -> bool {
        self.questions.lock().push(question.to_string());
        self.answer.load(Ordering::SeqCst)
    }
}
