use crate::domain::events::EventListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

type ListenerList<E> = RwLock<Vec<(u64, Arc<dyn EventListener<E>>)>>;

/// Event bus for publishing events to any number of listeners
pub struct EventBus<E> {
    listeners: Arc<ListenerList<E>>,
    next_id: Arc<AtomicU64>,
}

/// Handle returned by [`EventBus::subscribe`]; pass it back to detach the listener.
#[derive(Debug)]
pub struct Subscription<E> {
    id: u64,
    listeners: Weak<ListenerList<E>>,
}

impl<E> Subscription<E> {
    /// Detach the listener. Returns false if the bus is gone or the listener
    /// was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut guard = match listeners.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        guard.retain(|(id, _)| *id != self.id);
        guard.len() != before
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe a listener to events
    pub fn subscribe(&self, listener: Arc<dyn EventListener<E>>) -> Subscription<E> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.listeners.write() {
            Ok(mut guard) => guard.push((id, listener)),
            Err(poisoned) => poisoned.into_inner().push((id, listener)),
        }
        debug!("EventBus: listener {} subscribed", id);
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Publish an event to all listeners.
    ///
    /// Listeners run on the caller's task, outside the registry lock, so a
    /// listener may subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, event: &E) {
        let snapshot: Vec<Arc<dyn EventListener<E>>> = match self.listeners.read() {
            Ok(guard) => guard.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect(),
        };
        for listener in snapshot {
            listener.on_event(event);
        }
    }

    /// Get count of subscribers (for testing)
    pub fn subscriber_count(&self) -> usize {
        match self.listeners.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
            next_id: Arc::clone(&self.next_id),
        }
    }
}
