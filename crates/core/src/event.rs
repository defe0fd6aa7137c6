//! Channel-backed listener registration
//!
//! Collaborators (machine, renderer) publish notifications through a
//! [`Listeners`] registry. Each `subscribe()` hands out a [`Subscription`]
//! backed by its own unbounded channel, so every subscriber sees every event
//! in emission order. Dropping the subscription (or calling
//! [`Subscription::cancel`]) unsubscribes; the registry prunes closed senders
//! on the next emit.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Registry of event subscribers
pub struct Listeners<T> {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            senders: self.senders.clone(),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Listeners<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        Subscription { rx }
    }

    /// Deliver an event to every live subscriber
    ///
    /// Returns the number of subscribers that received it.
    pub fn emit(&self, event: T) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        senders.len()
    }

    /// Number of registered subscribers (closed ones are pruned lazily)
    pub fn len(&self) -> usize {
        self.senders.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving half of a listener registration
///
/// This is the cancellation handle: drop it to unsubscribe.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wait for the next event; `None` once the publisher is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Unsubscribe explicitly
    pub fn cancel(self) {
        drop(self);
    }
}
