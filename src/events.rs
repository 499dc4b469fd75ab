//! Typed publish/subscribe bus for lifecycle notifications
//!
//! Subscribers are plain closures invoked synchronously on emit. The
//! registry lives behind a mutex; emit takes a snapshot of the subscriber
//! list and invokes it outside the lock, so a subscriber may register
//! further subscribers without deadlocking.

use std::sync::{Arc, Mutex};

type Subscriber<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Synchronous event bus for a single event type
pub struct EventBus<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber; it stays registered for the bus lifetime
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Arc::new(subscriber));
        }
    }

    /// Deliver an event to every registered subscriber, in registration order
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Subscriber<E>> = match self.subscribers.lock() {
            Ok(subs) => subs.clone(),
            Err(_) => return,
        };

        for subscriber in snapshot {
            subscriber(event);
        }
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
